use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProviderSection;
use crate::profile::ProfilesSection;

use super::error::{ProviderError, ProviderResult};
use super::retry::RetryPolicy;
use super::types::{
    AssetMetadata, AssetPayload, CreateAssetRequest, DataEnvelope, InputSpec, ProviderAsset,
};

const ASSETS_PATH: &str = "video/v1/assets";

/// The external transcoding provider.
#[async_trait]
pub trait TranscodeProvider: Send + Sync {
    async fn create_asset(&self, request: &CreateAssetRequest) -> ProviderResult<ProviderAsset>;

    async fn get_asset(&self, asset_id: &str) -> ProviderResult<ProviderAsset>;

    async fn delete_asset(&self, asset_id: &str) -> ProviderResult<()>;

    /// Deletes the asset and only logs a failure. Local cleanup never waits on
    /// the provider agreeing.
    async fn discard_asset(&self, asset_id: &str) {
        match self.delete_asset(asset_id).await {
            Ok(()) => info!(asset_id, "provider asset deleted"),
            Err(err) => {
                warn!(asset_id, error = %err, "provider asset deletion failed, continuing")
            }
        }
    }
}

#[derive(Clone)]
pub struct HttpProviderClient {
    http_client: Client,
    base_url: String,
    token_id: String,
    token_secret: String,
    input_base_url: Option<String>,
    mp4_support: String,
    profiles: ProfilesSection,
    retry_policy: RetryPolicy,
}

impl HttpProviderClient {
    pub fn new(
        section: &ProviderSection,
        profiles: ProfilesSection,
        retry_policy: RetryPolicy,
    ) -> ProviderResult<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("matchreel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(section.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            http_client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            token_id: section.token_id.clone(),
            token_secret: section.token_secret.clone(),
            input_base_url: section.input_base_url.clone(),
            mp4_support: section.mp4_support.clone(),
            profiles,
            retry_policy,
        })
    }

    fn assets_url(&self) -> String {
        format!("{}/{}", self.base_url, ASSETS_PATH)
    }

    fn asset_url(&self, asset_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, ASSETS_PATH, asset_id)
    }

    /// Location the provider pulls the upload from.
    pub fn input_url(&self, file_path: &Path) -> ProviderResult<String> {
        let raw = file_path.to_string_lossy();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(raw.into_owned());
        }
        if let Some(base) = &self.input_base_url {
            let file_name = file_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| ProviderError::InvalidInput(raw.to_string()))?;
            let invalid_base = || ProviderError::InvalidInput(base.clone());
            let mut url = Url::parse(base).map_err(|_| invalid_base())?;
            url.path_segments_mut()
                .map_err(|_| invalid_base())?
                .pop_if_empty()
                .push(&file_name);
            return Ok(url.to_string());
        }
        let absolute = std::fs::canonicalize(file_path)
            .map_err(|_| ProviderError::InvalidInput(raw.to_string()))?;
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| ProviderError::InvalidInput(raw.to_string()))
    }

    pub fn build_payload(&self, request: &CreateAssetRequest) -> ProviderResult<AssetPayload> {
        let profile = self.profiles.for_tier(request.quality);
        Ok(AssetPayload {
            input: InputSpec {
                url: self.input_url(&request.file_path)?,
            },
            playback_policy: vec!["public".to_string()],
            encoding_tier: profile.encoding_tier.clone(),
            max_resolution_tier: profile.max_resolution_tier.clone(),
            mp4_support: self.mp4_support.clone(),
            metadata: request.title.as_ref().map(|title| AssetMetadata {
                video_title: title.clone(),
            }),
            webhook_url: request.webhook_url.clone(),
        })
    }

    async fn read_asset(response: Response) -> ProviderResult<ProviderAsset> {
        let envelope: DataEnvelope<ProviderAsset> = json_body(check_status(response).await?).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl TranscodeProvider for HttpProviderClient {
    async fn create_asset(&self, request: &CreateAssetRequest) -> ProviderResult<ProviderAsset> {
        let payload = self.build_payload(request)?;
        debug!(
            input = %payload.input.url,
            quality = %request.quality,
            "creating provider asset"
        );
        let url = self.assets_url();
        let asset = self
            .retry_policy
            .run("create_asset", || async {
                let response = self
                    .http_client
                    .post(&url)
                    .basic_auth(&self.token_id, Some(&self.token_secret))
                    .json(&payload)
                    .send()
                    .await?;
                Self::read_asset(response).await
            })
            .await?;
        info!(asset_id = %asset.id, quality = %request.quality, "provider asset created");
        Ok(asset)
    }

    async fn get_asset(&self, asset_id: &str) -> ProviderResult<ProviderAsset> {
        let url = self.asset_url(asset_id);
        self.retry_policy
            .run("get_asset", || async {
                let response = self
                    .http_client
                    .get(&url)
                    .basic_auth(&self.token_id, Some(&self.token_secret))
                    .send()
                    .await?;
                Self::read_asset(response).await
            })
            .await
    }

    async fn delete_asset(&self, asset_id: &str) -> ProviderResult<()> {
        let url = self.asset_url(asset_id);
        self.retry_policy
            .run("delete_asset", || async {
                let response = self
                    .http_client
                    .delete(&url)
                    .basic_auth(&self.token_id, Some(&self.token_secret))
                    .send()
                    .await?;
                check_status(response).await.map(|_| ())
            })
            .await
    }
}

async fn check_status(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status_code: status.as_u16(),
        body,
    })
}

async fn json_body<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::QualityTier;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn section(base_url: &str) -> ProviderSection {
        ProviderSection {
            base_url: base_url.to_string(),
            token_id: "token-id".into(),
            token_secret: "token-secret".into(),
            timeout_seconds: 5,
            input_base_url: Some("https://uploads.example.test/videos/".into()),
            mp4_support: "none".into(),
            webhook_url: None,
        }
    }

    fn client(server: &MockServer) -> HttpProviderClient {
        HttpProviderClient::new(
            &section(&server.uri()),
            ProfilesSection::default(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
        )
        .unwrap()
    }

    fn request(quality: QualityTier) -> CreateAssetRequest {
        CreateAssetRequest {
            file_path: "/srv/uploads/final.mp4".into(),
            quality,
            title: Some("Cup final".into()),
            webhook_url: Some("https://dashboard.example.test/hooks/video".into()),
        }
    }

    fn asset_body() -> serde_json::Value {
        json!({
            "data": {
                "id": "asset-123",
                "status": "preparing",
                "playback_ids": [{"id": "pb-123", "policy": "public"}]
            }
        })
    }

    #[tokio::test]
    async fn create_asset_sends_profile_and_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/video/v1/assets"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "input": {"url": "https://uploads.example.test/videos/final.mp4"},
                "playback_policy": ["public"],
                "encoding_tier": "smart",
                "max_resolution_tier": "1440p",
                "metadata": {"video_title": "Cup final"},
                "webhook_url": "https://dashboard.example.test/hooks/video"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(asset_body()))
            .expect(1)
            .mount(&server)
            .await;

        let asset = client(&server)
            .create_asset(&request(QualityTier::Premium))
            .await
            .unwrap();
        assert_eq!(asset.id, "asset-123");
        assert_eq!(asset.primary_playback_id(), Some("pb-123"));
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/video/v1/assets/asset-123"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/video/v1/assets/asset-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(asset_body()))
            .expect(1)
            .mount(&server)
            .await;

        let asset = client(&server).get_asset("asset-123").await.unwrap();
        assert_eq!(asset.status.as_deref(), Some("preparing"));
    }

    #[tokio::test]
    async fn client_errors_surface_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/video/v1/assets"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid input url"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .create_asset(&request(QualityTier::Standard))
            .await
            .unwrap_err();
        match err {
            ProviderError::Api { status_code, body } => {
                assert_eq!(status_code, 400);
                assert_eq!(body, "invalid input url");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn discard_asset_swallows_failures() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/video/v1/assets/asset-123"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.delete_asset("asset-123").await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        client.discard_asset("asset-123").await;
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 6);
    }

    #[test]
    fn input_url_passes_remote_urls_through() {
        let client = HttpProviderClient::new(
            &section("https://api.example.test"),
            ProfilesSection::default(),
            RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(
            client
                .input_url(Path::new("https://cdn.example.test/raw.mp4"))
                .unwrap(),
            "https://cdn.example.test/raw.mp4"
        );
    }

    #[test]
    fn input_url_escapes_file_names_under_the_base() {
        let client = HttpProviderClient::new(
            &section("https://api.example.test"),
            ProfilesSection::default(),
            RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(
            client
                .input_url(Path::new("/srv/uploads/final.mp4"))
                .unwrap(),
            "https://uploads.example.test/videos/final.mp4"
        );
        let url = client
            .input_url(Path::new("/srv/uploads/U12 final #2?.mp4"))
            .unwrap();
        assert_eq!(
            url,
            "https://uploads.example.test/videos/U12%20final%20%232%3F.mp4"
        );
        let parsed = Url::parse(&url).unwrap();
        assert!(parsed.fragment().is_none());
        assert!(parsed.query().is_none());
    }

    #[test]
    fn input_url_falls_back_to_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"video").unwrap();
        let mut section = section("https://api.example.test");
        section.input_base_url = None;
        let client =
            HttpProviderClient::new(&section, ProfilesSection::default(), RetryPolicy::none())
                .unwrap();
        let url = client.input_url(&file).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/clip.mp4"));
    }
}
