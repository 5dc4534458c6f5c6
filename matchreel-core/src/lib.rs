pub mod config;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod playback;
pub mod profile;
pub mod progress;
pub mod provider;
mod sqlite;
pub mod stream;
pub mod submission;
pub mod validator;
pub mod webhook;

pub use config::{
    load_matchreel_config, MatchreelConfig, PlaybackSection, ProviderSection, RetrySection,
    StorageSection, UploadSection, WebhookSection,
};
pub use dedup::{DedupHit, DeduplicationIndex};
pub use error::{ConfigError, ErrorKind, IngestError, IngestResult, Result};
pub use hasher::content_hash;
pub use playback::{sign_playback, PlaybackUrlBuilder, PlaybackUrls};
pub use profile::{resolution_ladder, EncodingProfile, ProfilesSection, QualityTier};
pub use progress::map_progress;
pub use provider::{
    CreateAssetRequest, HttpProviderClient, ProviderAsset, ProviderError, RetryPolicy,
    TranscodeProvider,
};
pub use stream::{
    SqliteStreamStore, StatusTransition, StoreError, StreamFilter, StreamRepository,
    StreamStatus, VideoStream,
};
pub use submission::{
    DeleteOutcome, SubmissionOrchestrator, SubmissionOutcome, SubmissionRequest,
};
pub use validator::{FileValidation, FileValidator};
pub use webhook::{WebhookEvent, WebhookOutcome, WebhookProcessor};
