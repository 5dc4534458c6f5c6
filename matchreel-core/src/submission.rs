use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::MatchreelConfig;
use crate::dedup::DeduplicationIndex;
use crate::error::{IngestError, IngestResult};
use crate::hasher::content_hash;
use crate::playback::PlaybackUrlBuilder;
use crate::profile::{ProfilesSection, QualityTier};
use crate::provider::{CreateAssetRequest, ProviderError, TranscodeProvider};
use crate::stream::{
    NewStream, StatusTransition, StreamRepository, StreamStatus, SubmissionRecord, VideoStream,
};
use crate::validator::FileValidator;
use crate::webhook::{completion_for, failure_reason};

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub local_stream_id: String,
    pub file_path: PathBuf,
    pub quality: QualityTier,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmissionOutcome {
    pub stream: VideoStream,
    pub deduplicated: bool,
    pub source_stream_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub local_stream_id: String,
    pub provider_asset_id: Option<String>,
    /// Whether a provider deletion was attempted. Shared assets are left alone.
    pub provider_cleanup: bool,
}

/// Entry point for accepted uploads and the administrative operations on them.
pub struct SubmissionOrchestrator {
    store: Arc<dyn StreamRepository>,
    provider: Arc<dyn TranscodeProvider>,
    dedup: DeduplicationIndex,
    validator: FileValidator,
    profiles: ProfilesSection,
    urls: PlaybackUrlBuilder,
    webhook_url: Option<String>,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn StreamRepository>,
        provider: Arc<dyn TranscodeProvider>,
        validator: FileValidator,
        profiles: ProfilesSection,
        urls: PlaybackUrlBuilder,
    ) -> Self {
        Self {
            dedup: DeduplicationIndex::new(store.clone()),
            store,
            provider,
            validator,
            profiles,
            urls,
            webhook_url: None,
        }
    }

    pub fn from_config(
        config: &MatchreelConfig,
        store: Arc<dyn StreamRepository>,
        provider: Arc<dyn TranscodeProvider>,
    ) -> Self {
        Self::new(
            store,
            provider,
            FileValidator::new(&config.upload),
            config.profiles.clone(),
            PlaybackUrlBuilder::from_config(&config.playback),
        )
        .with_webhook_url(config.provider.webhook_url.clone())
    }

    pub fn with_webhook_url(mut self, webhook_url: Option<String>) -> Self {
        self.webhook_url = webhook_url.filter(|url| !url.is_empty());
        self
    }

    pub async fn submit(&self, request: SubmissionRequest) -> IngestResult<SubmissionOutcome> {
        let stream_id = request.local_stream_id.as_str();
        let accepted = self.validator.validate(&request.file_path).into_result()?;

        let registered = self.store.register(&NewStream {
            local_stream_id: request.local_stream_id.clone(),
            title: request.title.clone(),
            quality: request.quality,
            file_size: accepted.file_size,
            format: accepted.format,
            uploaded_at: Utc::now(),
        })?;
        if registered.status != StreamStatus::Queued {
            return Err(IngestError::InvalidTransition {
                stream_id: request.local_stream_id.clone(),
                from: registered.status,
                to: StreamStatus::Processing,
            });
        }

        match self.run_submission(&request).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(stream_id, error = %err, kind = err.kind().as_str(), "submission failed");
                if let Err(store_err) = self.store.record_failure(stream_id, &err.to_string()) {
                    warn!(stream_id, error = %store_err, "could not persist submission failure");
                }
                Err(err)
            }
        }
    }

    async fn run_submission(&self, request: &SubmissionRequest) -> IngestResult<SubmissionOutcome> {
        let stream_id = request.local_stream_id.as_str();
        let hash = content_hash(&request.file_path)?;
        self.store.set_content_hash(stream_id, &hash)?;

        if let Some(hit) = self.dedup.lookup(&hash, stream_id)? {
            if !self.dedup.claim(stream_id, &hit)? {
                return Err(self.stale_transition(stream_id, StreamStatus::Processing));
            }
            let stream = self.fetch(stream_id)?;
            let stream = self.settle_shared(stream, &hit.provider_asset_id).await?;
            return Ok(SubmissionOutcome {
                stream,
                deduplicated: true,
                source_stream_id: Some(hit.source_stream_id),
            });
        }

        let asset = self
            .provider
            .create_asset(&CreateAssetRequest {
                file_path: request.file_path.clone(),
                quality: request.quality,
                title: request.title.clone(),
                webhook_url: self.webhook_url.clone(),
            })
            .await?;
        if asset.id.is_empty() {
            return Err(ProviderError::MissingField("id").into());
        }
        let Some(playback_id) = asset.primary_playback_id().map(str::to_string) else {
            self.provider.discard_asset(&asset.id).await;
            return Err(ProviderError::MissingField("playback_ids").into());
        };

        let profile = self.profiles.for_tier(request.quality);
        let recorded = self.store.record_submission(
            stream_id,
            &SubmissionRecord {
                provider_asset_id: asset.id.clone(),
                provider_playback_id: playback_id,
                bitrates: profile.bitrates.clone(),
                started_at: Utc::now(),
            },
        )?;
        if !recorded {
            return Err(self.stale_transition(stream_id, StreamStatus::Processing));
        }
        info!(
            stream_id,
            asset_id = %asset.id,
            quality = %request.quality,
            "stream submitted for transcoding"
        );
        Ok(SubmissionOutcome {
            stream: self.fetch(stream_id)?,
            deduplicated: false,
            source_stream_id: None,
        })
    }

    /// A shared asset can finish before this record joins it, and the provider
    /// does not repeat the webhook. Ask for its state once.
    async fn settle_shared(
        &self,
        stream: VideoStream,
        asset_id: &str,
    ) -> IngestResult<VideoStream> {
        if stream.status != StreamStatus::Processing {
            return Ok(stream);
        }
        let stream_id = stream.local_stream_id.as_str();
        let asset = match self.provider.get_asset(asset_id).await {
            Ok(asset) => asset,
            Err(err) => {
                warn!(
                    stream_id,
                    asset_id,
                    error = %err,
                    "shared asset state unknown, awaiting webhook"
                );
                return Ok(stream);
            }
        };
        let settled = match asset.status.as_deref() {
            Some("ready") => {
                let completion = completion_for(&self.urls, &stream, &asset, Utc::now());
                self.store.record_completion(stream_id, &completion)?
            }
            Some("errored") => self
                .store
                .record_failure(stream_id, &failure_reason(&asset.errors))?,
            _ => false,
        };
        if !settled {
            return Ok(stream);
        }
        info!(stream_id, asset_id, status = ?asset.status, "shared asset already settled");
        self.fetch(stream_id)
    }

    /// Local-only. Provider-side work continues.
    pub fn cancel(&self, stream_id: &str) -> IngestResult<VideoStream> {
        let stream = self.fetch(stream_id)?;
        if !stream.status.can_transition_to(StreamStatus::Cancelled)
            || !self.store.mark_cancelled(stream_id)?
        {
            return Err(self.stale_transition(stream_id, StreamStatus::Cancelled));
        }
        info!(stream_id, from = %stream.status, "stream cancelled");
        self.fetch(stream_id)
    }

    /// Removes the local record. The provider asset is discarded only when no
    /// other record shares it, and provider failures never block the removal.
    pub async fn delete(&self, stream_id: &str) -> IngestResult<DeleteOutcome> {
        let stream = self.fetch(stream_id)?;
        let mut provider_cleanup = false;
        if let Some(asset_id) = stream.provider_asset_id.as_deref() {
            let holders = self.store.count_by_provider_asset(asset_id)?;
            if holders <= 1 {
                self.provider.discard_asset(asset_id).await;
                provider_cleanup = true;
            } else {
                info!(stream_id, asset_id, holders, "provider asset still shared, keeping it");
            }
        }
        self.store.remove(stream_id)?;
        info!(stream_id, "stream deleted");
        Ok(DeleteOutcome {
            local_stream_id: stream_id.to_string(),
            provider_asset_id: stream.provider_asset_id,
            provider_cleanup,
        })
    }

    pub fn status(&self, stream_id: &str) -> IngestResult<VideoStream> {
        self.fetch(stream_id)
    }

    pub fn history(&self, stream_id: &str) -> IngestResult<Vec<StatusTransition>> {
        self.fetch(stream_id)?;
        Ok(self.store.history(stream_id)?)
    }

    fn fetch(&self, stream_id: &str) -> IngestResult<VideoStream> {
        self.store
            .get(stream_id)?
            .ok_or_else(|| IngestError::NotFound {
                stream_id: stream_id.to_string(),
            })
    }

    fn stale_transition(&self, stream_id: &str, to: StreamStatus) -> IngestError {
        match self.fetch(stream_id) {
            Ok(stream) => IngestError::InvalidTransition {
                stream_id: stream_id.to_string(),
                from: stream.status,
                to,
            },
            Err(err) => err,
        }
    }
}
