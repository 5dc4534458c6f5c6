use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::profile::QualityTier;

#[derive(Debug, Clone)]
pub struct CreateAssetRequest {
    pub file_path: PathBuf,
    pub quality: QualityTier,
    pub title: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InputSpec {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssetMetadata {
    pub video_title: String,
}

/// Body of the asset creation call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssetPayload {
    pub input: InputSpec,
    pub playback_policy: Vec<String>,
    pub encoding_tier: String,
    pub max_resolution_tier: String,
    pub mp4_support: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AssetMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackId {
    pub id: String,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderIssue {
    #[serde(default, alias = "type")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl ProviderIssue {
    /// `code: message`, or whichever half is present.
    pub fn describe(&self) -> String {
        let mut text: Vec<String> = Vec::new();
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            text.push(message.to_string());
        }
        text.extend(self.messages.iter().filter(|m| !m.is_empty()).cloned());
        match (self.code.as_deref(), text.is_empty()) {
            (Some(code), true) => code.to_string(),
            (Some(code), false) => format!("{code}: {}", text.join(", ")),
            (None, false) => text.join(", "),
            (None, true) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderAsset {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub playback_ids: Vec<PlaybackId>,
    #[serde(default, alias = "resolution", deserialize_with = "resolution_or_tier")]
    pub max_resolution_tier: Option<Resolution>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub errors: Vec<ProviderIssue>,
}

impl ProviderAsset {
    /// First public playback id, falling back to any playback id.
    pub fn primary_playback_id(&self) -> Option<&str> {
        self.playback_ids
            .iter()
            .find(|playback| playback.policy.as_deref() == Some("public"))
            .or_else(|| self.playback_ids.first())
            .map(|playback| playback.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResolutionRepr {
    Dimensions(Resolution),
    Tier(String),
}

/// Accepts either `{width, height}` or a tier label such as `"1080p"`.
fn resolution_or_tier<'de, D>(deserializer: D) -> Result<Option<Resolution>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<ResolutionRepr>::deserialize(deserializer)? {
        Some(ResolutionRepr::Dimensions(resolution)) => Some(resolution),
        Some(ResolutionRepr::Tier(tier)) => {
            crate::profile::RESOLUTION_TABLE
                .iter()
                .find(|rendition| {
                    rendition.label.eq_ignore_ascii_case(&tier)
                        || format!("{}p", rendition.height) == tier.to_ascii_lowercase()
                })
                .map(|rendition| Resolution {
                    width: rendition.width,
                    height: rendition.height,
                })
        }
        None => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ProviderIssue>),
    One(ProviderIssue),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<ProviderIssue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::Many(issues)) => issues,
        Some(OneOrMany::One(issue)) => vec![issue],
        None => Vec::new(),
    })
}
