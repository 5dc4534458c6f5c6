mod client;
mod error;
mod retry;
mod types;

pub use client::{HttpProviderClient, TranscodeProvider};
pub use error::{ProviderError, ProviderResult};
pub use retry::RetryPolicy;
pub use types::{
    AssetMetadata, AssetPayload, CreateAssetRequest, InputSpec, PlaybackId, ProviderAsset,
    ProviderIssue, Resolution,
};
