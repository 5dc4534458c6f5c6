use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::PlaybackSection;
use crate::error::{IngestError, IngestResult};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNED_URL_WINDOW_SECS: u64 = 3600;

/// Every URL derived from one playback id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackUrls {
    pub hls: String,
    pub dash: String,
    pub thumbnail: String,
    pub poster: String,
    pub thumbnail_small: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackUrlBuilder {
    stream_host: String,
    image_host: String,
}

impl PlaybackUrlBuilder {
    pub fn new(stream_host: impl Into<String>, image_host: impl Into<String>) -> Self {
        Self {
            stream_host: normalize_host(stream_host.into()),
            image_host: normalize_host(image_host.into()),
        }
    }

    pub fn from_config(section: &PlaybackSection) -> Self {
        Self::new(section.stream_host.clone(), section.image_host.clone())
    }

    pub fn hls(&self, playback_id: &str) -> String {
        format!("https://{}/{}.m3u8", self.stream_host, playback_id)
    }

    pub fn dash(&self, playback_id: &str) -> String {
        format!("https://{}/{}.mpd", self.stream_host, playback_id)
    }

    pub fn thumbnail(&self, playback_id: &str) -> String {
        format!("https://{}/{}/thumbnail.jpg", self.image_host, playback_id)
    }

    pub fn build(&self, playback_id: &str) -> PlaybackUrls {
        let thumbnail = self.thumbnail(playback_id);
        PlaybackUrls {
            hls: self.hls(playback_id),
            dash: self.dash(playback_id),
            poster: format!("{thumbnail}?width=1280&height=720&fit_mode=smartcrop"),
            thumbnail_small: format!("{thumbnail}?width=320&height=180"),
            thumbnail,
        }
    }

    /// HLS manifest URL carrying `token` and `exp` query parameters, valid for
    /// `window_secs` from now.
    pub fn generate_signed_playback_url(
        &self,
        playback_id: &str,
        key: &str,
        window_secs: u64,
    ) -> IngestResult<String> {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        let exp = Utc::now().timestamp().saturating_add(window);
        self.signed_url(playback_id, key, exp)
    }

    pub fn signed_url_expiring_at(
        &self,
        playback_id: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> IngestResult<String> {
        self.signed_url(playback_id, key, expires_at.timestamp())
    }

    fn signed_url(&self, playback_id: &str, key: &str, exp: i64) -> IngestResult<String> {
        let token = sign_playback(playback_id, key, exp)?;
        Ok(format!("{}?token={token}&exp={exp}", self.hls(playback_id)))
    }
}

/// Hex HMAC-SHA256 over the playback id immediately followed by the expiry.
pub fn sign_playback(playback_id: &str, key: &str, exp: i64) -> IngestResult<String> {
    if key.is_empty() {
        return Err(IngestError::Validation(
            "playback signing key is empty".to_string(),
        ));
    }
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|err| IngestError::Validation(format!("invalid signing key: {err}")))?;
    mac.update(playback_id.as_bytes());
    mac.update(exp.to_string().as_bytes());
    Ok(hex_encode(mac.finalize().into_bytes()))
}

fn normalize_host(host: String) -> String {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use url::Url;

    fn builder() -> PlaybackUrlBuilder {
        PlaybackUrlBuilder::new("stream.example.test", "https://image.example.test/")
    }

    #[test]
    fn builds_every_url_from_the_playback_id() {
        let urls = builder().build("pb1");
        assert_eq!(urls.hls, "https://stream.example.test/pb1.m3u8");
        assert_eq!(urls.dash, "https://stream.example.test/pb1.mpd");
        assert_eq!(urls.thumbnail, "https://image.example.test/pb1/thumbnail.jpg");
        assert_eq!(
            urls.poster,
            "https://image.example.test/pb1/thumbnail.jpg?width=1280&height=720&fit_mode=smartcrop"
        );
        assert_eq!(
            urls.thumbnail_small,
            "https://image.example.test/pb1/thumbnail.jpg?width=320&height=180"
        );
    }

    #[test]
    fn signed_url_expires_one_window_from_now() {
        let before = Utc::now().timestamp();
        let signed = builder()
            .generate_signed_playback_url("pb1", "secret", 3600)
            .unwrap();
        let after = Utc::now().timestamp();

        let url = Url::parse(&signed).unwrap();
        assert_eq!(url.path(), "/pb1.m3u8");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let exp: i64 = params["exp"].parse().unwrap();
        assert!(exp >= before + 3600 && exp <= after + 3600);
        assert_eq!(params["token"].len(), 64);
        assert_eq!(params["token"], sign_playback("pb1", "secret", exp).unwrap());
    }

    #[test]
    fn signature_depends_on_id_expiry_and_key() {
        let expires_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let builder = builder();
        let base = builder
            .signed_url_expiring_at("pb1", "secret", expires_at)
            .unwrap();
        assert_eq!(
            base,
            builder
                .signed_url_expiring_at("pb1", "secret", expires_at)
                .unwrap()
        );
        assert_ne!(
            base,
            builder
                .signed_url_expiring_at("pb2", "secret", expires_at)
                .unwrap()
        );
        assert_ne!(
            sign_playback("pb1", "secret", 1).unwrap(),
            sign_playback("pb1", "other", 1).unwrap()
        );
        assert_ne!(
            sign_playback("pb1", "secret", 1).unwrap(),
            sign_playback("pb1", "secret", 2).unwrap()
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(builder()
            .generate_signed_playback_url("pb1", "", 60)
            .is_err());
    }
}
