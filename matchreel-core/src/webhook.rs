use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::config::MatchreelConfig;
use crate::error::{IngestError, IngestResult};
use crate::playback::PlaybackUrlBuilder;
use crate::profile::resolution_ladder;
use crate::progress::map_progress;
use crate::provider::{ProviderAsset, ProviderIssue, TranscodeProvider};
use crate::stream::{CompletionRecord, StoreResult, StreamRepository, VideoStream};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Provider lifecycle event, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Ready { asset: ProviderAsset },
    Errored {
        asset_id: String,
        errors: Vec<ProviderIssue>,
    },
    Updated {
        asset_id: String,
        status: Option<String>,
    },
    Unknown { event_type: String },
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<Value>,
}

impl WebhookEvent {
    pub fn decode(body: &[u8]) -> IngestResult<Self> {
        let raw: RawEvent = serde_json::from_slice(body)?;
        let data = raw.data.unwrap_or(Value::Null);
        Ok(match raw.event_type.as_str() {
            "asset.ready" => WebhookEvent::Ready {
                asset: serde_json::from_value(data)?,
            },
            "asset.errored" => {
                let asset: ProviderAsset = serde_json::from_value(data)?;
                WebhookEvent::Errored {
                    asset_id: asset.id,
                    errors: asset.errors,
                }
            }
            "asset.updated" => {
                let asset: ProviderAsset = serde_json::from_value(data)?;
                WebhookEvent::Updated {
                    asset_id: asset.id,
                    status: asset.status,
                }
            }
            _ => WebhookEvent::Unknown {
                event_type: raw.event_type,
            },
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::Ready { .. } => "asset.ready",
            WebhookEvent::Errored { .. } => "asset.errored",
            WebhookEvent::Updated { .. } => "asset.updated",
            WebhookEvent::Unknown { event_type } => event_type,
        }
    }

    pub fn asset_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::Ready { asset } => Some(&asset.id),
            WebhookEvent::Errored { asset_id, .. } | WebhookEvent::Updated { asset_id, .. } => {
                Some(asset_id)
            }
            WebhookEvent::Unknown { .. } => None,
        }
    }
}

/// What happened to a delivery. Never an error: the sender only needs a 2xx.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        event_type: String,
        asset_id: String,
        updated: Vec<String>,
        skipped: Vec<String>,
    },
    UnknownAsset {
        event_type: String,
        asset_id: String,
    },
    Ignored {
        event_type: String,
    },
    Rejected {
        reason: String,
    },
    Failed {
        asset_id: String,
        reason: String,
    },
}

/// Joins every reported issue as `code: message`, separated by `; `.
pub fn failure_reason(errors: &[ProviderIssue]) -> String {
    if errors.is_empty() {
        return "provider reported an unspecified error".to_string();
    }
    errors
        .iter()
        .map(ProviderIssue::describe)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct WebhookProcessor {
    store: Arc<dyn StreamRepository>,
    provider: Arc<dyn TranscodeProvider>,
    urls: PlaybackUrlBuilder,
    signing_secret: Option<String>,
    tolerance_secs: i64,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn StreamRepository>,
        provider: Arc<dyn TranscodeProvider>,
        urls: PlaybackUrlBuilder,
    ) -> Self {
        Self {
            store,
            provider,
            urls,
            signing_secret: None,
            tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn from_config(
        config: &MatchreelConfig,
        store: Arc<dyn StreamRepository>,
        provider: Arc<dyn TranscodeProvider>,
    ) -> Self {
        Self::new(store, provider, PlaybackUrlBuilder::from_config(&config.playback))
            .with_signing_secret(
                config.webhook.signing_secret.clone(),
                config.webhook.tolerance_seconds.min(i64::MAX as u64) as i64,
            )
    }

    pub fn with_signing_secret(mut self, secret: Option<String>, tolerance_secs: i64) -> Self {
        self.signing_secret = secret.filter(|secret| !secret.is_empty());
        self.tolerance_secs = tolerance_secs.max(0);
        self
    }

    pub fn requires_signature(&self) -> bool {
        self.signing_secret.is_some()
    }

    /// Checks a `t=<unix>,v1=<hex>` header against the raw body.
    pub fn verify_signature(&self, header: &str, body: &[u8]) -> IngestResult<()> {
        let Some(secret) = &self.signing_secret else {
            return Ok(());
        };
        verify_signature(
            secret,
            header,
            body,
            Utc::now().timestamp(),
            self.tolerance_secs,
        )
    }

    /// Verifies the signature when a secret is configured, then processes.
    pub async fn process_signed(&self, signature: Option<&str>, body: &[u8]) -> WebhookOutcome {
        if self.requires_signature() {
            let checked = match signature {
                Some(header) => self.verify_signature(header, body),
                None => Err(IngestError::Signature("missing signature header".into())),
            };
            if let Err(err) = checked {
                warn!(error = %err, "rejecting webhook delivery");
                return WebhookOutcome::Rejected {
                    reason: err.to_string(),
                };
            }
        }
        self.process(body).await
    }

    pub async fn process(&self, body: &[u8]) -> WebhookOutcome {
        let event = match WebhookEvent::decode(body) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "discarding undecodable webhook");
                return WebhookOutcome::Rejected {
                    reason: err.to_string(),
                };
            }
        };
        self.handle(event).await
    }

    pub async fn handle(&self, event: WebhookEvent) -> WebhookOutcome {
        let event_type = event.event_type().to_string();
        let Some(asset_id) = event.asset_id().map(str::to_string) else {
            debug!(event_type = %event_type, "ignoring webhook event");
            return WebhookOutcome::Ignored { event_type };
        };
        if asset_id.is_empty() {
            return WebhookOutcome::Rejected {
                reason: format!("{event_type} without an asset id"),
            };
        }

        let records = match self.store.find_by_provider_asset(&asset_id) {
            Ok(records) => records,
            Err(err) => {
                error!(asset_id = %asset_id, error = %err, "failed to resolve webhook asset");
                return WebhookOutcome::Failed {
                    asset_id,
                    reason: err.to_string(),
                };
            }
        };
        if records.is_empty() {
            warn!(
                event_type = %event_type,
                asset_id = %asset_id,
                "webhook for unknown provider asset"
            );
            return WebhookOutcome::UnknownAsset {
                event_type,
                asset_id,
            };
        }

        let result = match event {
            WebhookEvent::Ready { asset } => self.on_ready(asset, &records).await,
            WebhookEvent::Errored { errors, .. } => self.on_errored(&errors, &records),
            WebhookEvent::Updated { status, .. } => self.on_updated(status.as_deref(), &records),
            WebhookEvent::Unknown { .. } => return WebhookOutcome::Ignored { event_type },
        };

        match result {
            Ok((updated, skipped)) => {
                info!(
                    event_type = %event_type,
                    asset_id = %asset_id,
                    updated = updated.len(),
                    skipped = skipped.len(),
                    "webhook applied"
                );
                WebhookOutcome::Applied {
                    event_type,
                    asset_id,
                    updated,
                    skipped,
                }
            }
            Err(err) => {
                error!(
                    event_type = %event_type,
                    asset_id = %asset_id,
                    error = %err,
                    "webhook handling failed"
                );
                WebhookOutcome::Failed {
                    asset_id,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn on_ready(
        &self,
        payload: ProviderAsset,
        records: &[VideoStream],
    ) -> IngestResult<(Vec<String>, Vec<String>)> {
        if records.iter().all(|record| record.status.terminal()) {
            return Ok(skip_all(records, "asset.ready"));
        }

        let asset = match self.provider.get_asset(&payload.id).await {
            Ok(fetched) => merge_assets(fetched, payload),
            Err(err) => {
                warn!(
                    asset_id = %payload.id,
                    error = %err,
                    "asset fetch failed, using webhook payload"
                );
                payload
            }
        };

        let completed_at = Utc::now();
        self.apply(records, "asset.ready", |record| {
            let completion = completion_for(&self.urls, record, &asset, completed_at);
            self.store
                .record_completion(&record.local_stream_id, &completion)
        })
    }

    fn on_errored(
        &self,
        errors: &[ProviderIssue],
        records: &[VideoStream],
    ) -> IngestResult<(Vec<String>, Vec<String>)> {
        let reason = failure_reason(errors);
        self.apply(records, "asset.errored", |record| {
            self.store.record_failure(&record.local_stream_id, &reason)
        })
    }

    fn on_updated(
        &self,
        status: Option<&str>,
        records: &[VideoStream],
    ) -> IngestResult<(Vec<String>, Vec<String>)> {
        let Some(status) = status else {
            return Ok(skip_all(records, "asset.updated"));
        };
        let progress = map_progress(status);
        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        for record in records {
            if !record.status.terminal()
                && self
                    .store
                    .record_progress(&record.local_stream_id, progress)?
            {
                updated.push(record.local_stream_id.clone());
            } else {
                skipped.push(record.local_stream_id.clone());
            }
        }
        Ok((updated, skipped))
    }

    /// Runs `write` for every non-terminal record. Terminal records are sticky.
    fn apply<F>(
        &self,
        records: &[VideoStream],
        event_type: &str,
        write: F,
    ) -> IngestResult<(Vec<String>, Vec<String>)>
    where
        F: Fn(&VideoStream) -> StoreResult<bool>,
    {
        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        let mut first_error = None;
        for record in records {
            let stream_id = record.local_stream_id.as_str();
            if record.status.terminal() {
                warn!(
                    stream_id,
                    status = %record.status,
                    event_type,
                    "ignoring event for terminal stream"
                );
                skipped.push(stream_id.to_string());
                continue;
            }
            match write(record) {
                Ok(true) => updated.push(stream_id.to_string()),
                Ok(false) => skipped.push(stream_id.to_string()),
                Err(err) => {
                    error!(stream_id, event_type, error = %err, "failed to persist webhook");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok((updated, skipped)),
        }
    }
}

fn skip_all(records: &[VideoStream], event_type: &str) -> (Vec<String>, Vec<String>) {
    debug!(event_type, "no active stream for asset");
    (
        Vec::new(),
        records
            .iter()
            .map(|record| record.local_stream_id.clone())
            .collect(),
    )
}

/// Completion fields for `record` from a ready asset.
pub(crate) fn completion_for(
    urls: &PlaybackUrlBuilder,
    record: &VideoStream,
    asset: &ProviderAsset,
    completed_at: DateTime<Utc>,
) -> CompletionRecord {
    // The id stored at submission wins over whatever the asset carries.
    let playback_id = record
        .provider_playback_id
        .clone()
        .or_else(|| asset.primary_playback_id().map(str::to_string));
    let resolution = asset.max_resolution_tier;
    CompletionRecord {
        urls: playback_id.as_deref().map(|id| urls.build(id)),
        provider_playback_id: playback_id,
        duration: asset.duration,
        width: resolution.map(|r| r.width),
        height: resolution.map(|r| r.height),
        resolutions: resolution
            .map(|r| resolution_ladder(r.width, r.height))
            .unwrap_or_default(),
        completed_at,
    }
}

/// Fields missing from the fetched asset fall back to the webhook payload.
fn merge_assets(fetched: ProviderAsset, payload: ProviderAsset) -> ProviderAsset {
    ProviderAsset {
        id: payload.id,
        status: fetched.status.or(payload.status),
        duration: fetched.duration.or(payload.duration),
        playback_ids: if fetched.playback_ids.is_empty() {
            payload.playback_ids
        } else {
            fetched.playback_ids
        },
        max_resolution_tier: fetched.max_resolution_tier.or(payload.max_resolution_tier),
        errors: fetched.errors,
    }
}

pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> IngestResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp =
        timestamp.ok_or_else(|| IngestError::Signature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(IngestError::Signature("missing v1 signature".into()));
    }
    if now.abs_diff(timestamp) > tolerance_secs.max(0).unsigned_abs() {
        return Err(IngestError::Signature(format!(
            "timestamp {timestamp} outside the {tolerance_secs}s tolerance"
        )));
    }

    let matches = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    });
    if matches {
        Ok(())
    } else {
        Err(IngestError::Signature("signature mismatch".into()))
    }
}

/// Header value for `body` signed at `timestamp`. Used by senders and tests.
pub fn sign_webhook(secret: &str, timestamp: i64, body: &[u8]) -> IngestResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| IngestError::Signature(err.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
