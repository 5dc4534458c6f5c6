use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::profile::ProfilesSection;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MatchreelConfig {
    pub provider: ProviderSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub upload: UploadSection,
    pub playback: PlaybackSection,
    #[serde(default)]
    pub webhook: WebhookSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub profiles: ProfilesSection,
    /// Directory relative paths are resolved against. Set by the loader.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl MatchreelConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        match &self.base_dir {
            Some(base) if !path.is_absolute() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.database)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Public location uploads are served from; the file name is appended.
    pub input_base_url: Option<String>,
    #[serde(default = "default_mp4_support")]
    pub mp4_support: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub max_file_size: u64,
    pub allowed_formats: Vec<String>,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            max_file_size: 5 * 1024 * 1024 * 1024,
            allowed_formats: ["mp4", "mov", "avi", "mkv", "webm", "m4v"]
                .iter()
                .map(|format| format.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackSection {
    pub stream_host: String,
    pub image_host: String,
    pub signing_key: Option<String>,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub signing_secret: Option<String>,
    pub tolerance_seconds: u64,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            signing_secret: None,
            tolerance_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub database: String,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_mp4_support() -> String {
    "none".to_string()
}

fn default_signed_url_ttl() -> u64 {
    3600
}

pub fn load_matchreel_config<P: AsRef<Path>>(path: P) -> Result<MatchreelConfig> {
    let path = path.as_ref();
    let mut config: MatchreelConfig = load_toml(path)?;
    config.base_dir = path.parent().map(Path::to_path_buf);
    validate(&config)?;
    Ok(config)
}

fn validate(config: &MatchreelConfig) -> Result<()> {
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid {
            field: "retry.max_attempts",
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.upload.allowed_formats.is_empty() {
        return Err(ConfigError::Invalid {
            field: "upload.allowed_formats",
            reason: "at least one format is required".to_string(),
        });
    }
    if config.provider.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "provider.base_url",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
