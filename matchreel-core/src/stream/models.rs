use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::playback::PlaybackUrls;
use crate::profile::QualityTier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Queued => "queued",
            StreamStatus::Processing => "processing",
            StreamStatus::Completed => "completed",
            StreamStatus::Failed => "failed",
            StreamStatus::Cancelled => "cancelled",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            StreamStatus::Completed | StreamStatus::Failed | StreamStatus::Cancelled
        )
    }

    /// Edges of the lifecycle. Terminal states have no outgoing edges.
    pub fn can_transition_to(&self, next: StreamStatus) -> bool {
        use StreamStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Completed)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(StreamStatus::Queued),
            "processing" => Ok(StreamStatus::Processing),
            "completed" => Ok(StreamStatus::Completed),
            "failed" => Ok(StreamStatus::Failed),
            "cancelled" => Ok(StreamStatus::Cancelled),
            other => Err(format!("unknown stream status: {other}")),
        }
    }
}

impl FromSql for StreamStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err: String| FromSqlError::Other(err.into()))
    }
}

/// One logical upload and everything known about its provider-side asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    pub local_stream_id: String,
    pub title: Option<String>,
    pub quality: QualityTier,
    pub file_size: Option<u64>,
    pub format: Option<String>,
    pub content_hash: Option<String>,
    pub provider_asset_id: Option<String>,
    pub provider_playback_id: Option<String>,
    pub status: StreamStatus,
    pub progress: u8,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resolutions: Vec<String>,
    pub bitrates: Vec<String>,
    pub urls: Option<PlaybackUrls>,
    pub failure_reason: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub transcoding_started_at: Option<DateTime<Utc>>,
    pub transcoding_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl VideoStream {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let hls_url: Option<String> = row.get("hls_url")?;
        let urls = match hls_url {
            Some(hls) => Some(PlaybackUrls {
                hls,
                dash: row.get::<_, Option<String>>("dash_url")?.unwrap_or_default(),
                thumbnail: row
                    .get::<_, Option<String>>("thumbnail_url")?
                    .unwrap_or_default(),
                poster: row
                    .get::<_, Option<String>>("poster_url")?
                    .unwrap_or_default(),
                thumbnail_small: row
                    .get::<_, Option<String>>("thumbnail_small_url")?
                    .unwrap_or_default(),
            }),
            None => None,
        };
        Ok(Self {
            local_stream_id: row.get("local_stream_id")?,
            title: row.get("title")?,
            quality: row
                .get::<_, String>("quality_tier")?
                .parse()
                .unwrap_or_default(),
            file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v as u64),
            format: row.get("format")?,
            content_hash: row.get("content_hash")?,
            provider_asset_id: row.get("provider_asset_id")?,
            provider_playback_id: row.get("provider_playback_id")?,
            status: row.get("status")?,
            progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
            duration: row.get("duration_s")?,
            width: row.get::<_, Option<i64>>("width")?.map(|v| v as u32),
            height: row.get::<_, Option<i64>>("height")?.map(|v| v as u32),
            resolutions: split_list(row.get("resolutions")?),
            bitrates: split_list(row.get("bitrates")?),
            urls,
            failure_reason: row.get("failure_reason")?,
            uploaded_at: to_utc(row.get("uploaded_at")?),
            transcoding_started_at: to_utc(row.get("transcoding_started_at")?),
            transcoding_completed_at: to_utc(row.get("transcoding_completed_at")?),
            completed_at: to_utc(row.get("completed_at")?),
            updated_at: to_utc(row.get("updated_at")?),
        })
    }

    pub fn join_list(values: &[String]) -> Option<String> {
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|value| {
            value
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(|item| item.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn to_utc(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| Utc.from_utc_datetime(&dt))
}

#[derive(Debug, Clone)]
pub struct NewStream {
    pub local_stream_id: String,
    pub title: Option<String>,
    pub quality: QualityTier,
    pub file_size: u64,
    pub format: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub provider_asset_id: String,
    pub provider_playback_id: String,
    pub bitrates: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub provider_playback_id: Option<String>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resolutions: Vec<String>,
    pub urls: Option<PlaybackUrls>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub status: Option<StreamStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusTransition {
    pub local_stream_id: String,
    pub from: Option<StreamStatus>,
    pub to: StreamStatus,
    pub note: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl StatusTransition {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_stream_id: row.get("local_stream_id")?,
            from: row.get("status_from")?,
            to: row.get("status_to")?,
            note: row.get("note")?,
            recorded_at: to_utc(row.get("recorded_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            StreamStatus::Completed,
            StreamStatus::Failed,
            StreamStatus::Cancelled,
        ] {
            assert!(terminal.terminal());
            for next in [
                StreamStatus::Queued,
                StreamStatus::Processing,
                StreamStatus::Completed,
                StreamStatus::Failed,
                StreamStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn processing_never_returns_to_queued() {
        assert!(!StreamStatus::Processing.can_transition_to(StreamStatus::Queued));
        assert!(StreamStatus::Queued.can_transition_to(StreamStatus::Processing));
        assert!(StreamStatus::Processing.can_transition_to(StreamStatus::Cancelled));
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("COMPLETED".parse::<StreamStatus>(), Ok(StreamStatus::Completed));
        assert_eq!(StreamStatus::Cancelled.to_string(), "cancelled");
    }
}
