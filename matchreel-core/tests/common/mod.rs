#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use matchreel_core::provider::{PlaybackId, ProviderResult};
use matchreel_core::{
    CreateAssetRequest, FileValidator, PlaybackUrlBuilder, ProfilesSection, ProviderAsset,
    ProviderError, QualityTier, SqliteStreamStore, SubmissionOrchestrator, SubmissionRequest,
    TranscodeProvider, UploadSection, WebhookProcessor,
};

/// Provider double that records every call.
#[derive(Default)]
pub struct FakeProvider {
    pub created: AtomicUsize,
    pub fetched: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<CreateAssetRequest>>,
    pub fail_create_with: Mutex<Option<u16>>,
    pub omit_playback_id: Mutex<bool>,
    pub fetched_asset: Mutex<Option<ProviderAsset>>,
}

impl FakeProvider {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscodeProvider for FakeProvider {
    async fn create_asset(&self, request: &CreateAssetRequest) -> ProviderResult<ProviderAsset> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if let Some(status_code) = *self.fail_create_with.lock().unwrap() {
            return Err(ProviderError::Api {
                status_code,
                body: "provider rejected the asset".into(),
            });
        }
        let playback_ids = if *self.omit_playback_id.lock().unwrap() {
            Vec::new()
        } else {
            vec![PlaybackId {
                id: format!("pb-{n}"),
                policy: Some("public".into()),
            }]
        };
        Ok(ProviderAsset {
            id: format!("asset-{n}"),
            status: Some("preparing".into()),
            playback_ids,
            ..ProviderAsset::default()
        })
    }

    async fn get_asset(&self, asset_id: &str) -> ProviderResult<ProviderAsset> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        match self.fetched_asset.lock().unwrap().clone() {
            Some(asset) => Ok(asset),
            None => Err(ProviderError::Api {
                status_code: 404,
                body: format!("asset {asset_id} not found"),
            }),
        }
    }

    async fn delete_asset(&self, asset_id: &str) -> ProviderResult<()> {
        self.deleted.lock().unwrap().push(asset_id.to_string());
        Err(ProviderError::Api {
            status_code: 503,
            body: "unavailable".into(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteStreamStore>,
    pub provider: Arc<FakeProvider>,
    pub orchestrator: SubmissionOrchestrator,
    pub webhooks: WebhookProcessor,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteStreamStore::new(dir.path().join("streams.sqlite")).unwrap();
        store.initialize().unwrap();
        let store = Arc::new(store);
        let provider = Arc::new(FakeProvider::default());
        let orchestrator = SubmissionOrchestrator::new(
            store.clone(),
            provider.clone(),
            FileValidator::new(&UploadSection::default()),
            ProfilesSection::default(),
            PlaybackUrlBuilder::new("stream.example.test", "image.example.test"),
        )
        .with_webhook_url(Some("https://club.example.test/hooks/video".into()));
        let webhooks = WebhookProcessor::new(
            store.clone(),
            provider.clone(),
            PlaybackUrlBuilder::new("stream.example.test", "image.example.test"),
        );
        Self {
            dir,
            store,
            provider,
            orchestrator,
            webhooks,
        }
    }

    pub fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn request(&self, stream_id: &str, path: PathBuf) -> SubmissionRequest {
        SubmissionRequest {
            local_stream_id: stream_id.into(),
            file_path: path,
            quality: QualityTier::Standard,
            title: Some(format!("Match {stream_id}")),
        }
    }
}

pub fn event(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

pub fn ready_event(asset_id: &str) -> Vec<u8> {
    event(serde_json::json!({
        "type": "asset.ready",
        "data": {
            "id": asset_id,
            "duration": 120,
            "max_resolution_tier": {"width": 1920, "height": 1080},
            "playback_ids": [{"id": "pb1"}]
        }
    }))
}
