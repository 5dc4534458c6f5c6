use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};

use crate::sqlite::configure_connection;

use super::models::{
    CompletionRecord, NewStream, StatusTransition, StreamFilter, StreamStatus, SubmissionRecord,
    VideoStream,
};
use super::{StoreError, StoreResult};

const STREAM_SCHEMA: &str = include_str!("../../../sql/streams.sql");

const ACTIVE_STATUSES: &str = "('queued', 'processing')";

/// Persistence collaborator of the pipeline.
///
/// Every status-changing write is conditional on the record still being
/// active, so a terminal record is never moved by a late or duplicated event.
/// The boolean returned by those writes reports whether the row changed.
pub trait StreamRepository: Send + Sync {
    fn register(&self, stream: &NewStream) -> StoreResult<VideoStream>;
    fn set_content_hash(&self, stream_id: &str, content_hash: &str) -> StoreResult<()>;
    fn get(&self, stream_id: &str) -> StoreResult<Option<VideoStream>>;
    /// Oldest reusable record with this hash, excluding `stream_id` itself.
    fn find_by_hash(&self, content_hash: &str, exclude: &str)
        -> StoreResult<Option<VideoStream>>;
    fn find_by_provider_asset(&self, asset_id: &str) -> StoreResult<Vec<VideoStream>>;
    fn count_by_provider_asset(&self, asset_id: &str) -> StoreResult<usize>;
    fn record_submission(&self, stream_id: &str, record: &SubmissionRecord)
        -> StoreResult<bool>;
    fn adopt(&self, stream_id: &str, source: &VideoStream) -> StoreResult<bool>;
    fn record_failure(&self, stream_id: &str, reason: &str) -> StoreResult<bool>;
    fn record_completion(&self, stream_id: &str, record: &CompletionRecord)
        -> StoreResult<bool>;
    fn record_progress(&self, stream_id: &str, progress: u8) -> StoreResult<bool>;
    fn mark_cancelled(&self, stream_id: &str) -> StoreResult<bool>;
    fn remove(&self, stream_id: &str) -> StoreResult<bool>;
    fn list(&self, filter: &StreamFilter) -> StoreResult<Vec<VideoStream>>;
    fn history(&self, stream_id: &str) -> StoreResult<Vec<StatusTransition>>;
}

#[derive(Debug, Clone)]
pub struct SqliteStreamStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteStreamStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteStreamStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteStreamStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteStreamStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStreamStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteStreamStore {
    pub fn builder() -> SqliteStreamStoreBuilder {
        SqliteStreamStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteStreamStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY)
            {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(STREAM_SCHEMA)?;
        Ok(())
    }

    /// Runs `update` inside a transaction and logs the status change when a row moved.
    fn transition<F>(
        &self,
        stream_id: &str,
        to: StreamStatus,
        note: Option<&str>,
        update: F,
    ) -> StoreResult<bool>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<usize>,
    {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let from = current_status(&tx, stream_id)?.ok_or_else(|| StoreError::NotFound {
            stream_id: stream_id.to_string(),
        })?;
        let affected = update(&tx)?;
        if affected > 0 && from != to {
            insert_transition(&tx, stream_id, Some(from), to, note)?;
        }
        tx.commit()?;
        Ok(affected > 0)
    }
}

impl StreamRepository for SqliteStreamStore {
    fn register(&self, stream: &NewStream) -> StoreResult<VideoStream> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        match current_status(&tx, &stream.local_stream_id)? {
            None => {
                tx.execute(
                    "INSERT INTO video_streams (
                        local_stream_id, title, quality_tier, file_size, format,
                        status, progress, uploaded_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 'queued', 0, ?6, CURRENT_TIMESTAMP)",
                    params![
                        &stream.local_stream_id,
                        &stream.title,
                        stream.quality.as_str(),
                        stream.file_size as i64,
                        &stream.format,
                        stream.uploaded_at.naive_utc(),
                    ],
                )?;
                insert_transition(
                    &tx,
                    &stream.local_stream_id,
                    None,
                    StreamStatus::Queued,
                    Some("upload registered"),
                )?;
            }
            Some(StreamStatus::Queued) => {
                tx.execute(
                    "UPDATE video_streams
                     SET title = COALESCE(?2, title),
                         quality_tier = ?3,
                         file_size = ?4,
                         format = ?5,
                         updated_at = CURRENT_TIMESTAMP
                     WHERE local_stream_id = ?1",
                    params![
                        &stream.local_stream_id,
                        &stream.title,
                        stream.quality.as_str(),
                        stream.file_size as i64,
                        &stream.format,
                    ],
                )?;
            }
            Some(_) => {}
        }
        let record = fetch(&tx, &stream.local_stream_id)?.ok_or_else(|| StoreError::NotFound {
            stream_id: stream.local_stream_id.clone(),
        })?;
        tx.commit()?;
        Ok(record)
    }

    fn set_content_hash(&self, stream_id: &str, content_hash: &str) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE video_streams SET content_hash = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE local_stream_id = ?1",
            params![stream_id, content_hash],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                stream_id: stream_id.to_string(),
            });
        }
        Ok(())
    }

    fn get(&self, stream_id: &str) -> StoreResult<Option<VideoStream>> {
        let conn = self.open()?;
        fetch(&conn, stream_id)
    }

    fn find_by_hash(
        &self,
        content_hash: &str,
        exclude: &str,
    ) -> StoreResult<Option<VideoStream>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM video_streams
             WHERE content_hash = ?1
               AND local_stream_id != ?2
               AND provider_asset_id IS NOT NULL
               AND status IN ('queued', 'processing', 'completed')
             ORDER BY CASE status WHEN 'completed' THEN 0 ELSE 1 END,
                      uploaded_at ASC
             LIMIT 1",
        )?;
        let stream = stmt
            .query_row(params![content_hash, exclude], |row| {
                VideoStream::from_row(row)
            })
            .optional()?;
        Ok(stream)
    }

    fn find_by_provider_asset(&self, asset_id: &str) -> StoreResult<Vec<VideoStream>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM video_streams WHERE provider_asset_id = ?1 ORDER BY uploaded_at ASC",
        )?;
        let rows = stmt
            .query_map([asset_id], |row| VideoStream::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_by_provider_asset(&self, asset_id: &str) -> StoreResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM video_streams WHERE provider_asset_id = ?1",
            [asset_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn record_submission(
        &self,
        stream_id: &str,
        record: &SubmissionRecord,
    ) -> StoreResult<bool> {
        self.transition(
            stream_id,
            StreamStatus::Processing,
            Some("submitted to provider"),
            |tx| {
                tx.execute(
                    &format!(
                        "UPDATE video_streams
                         SET provider_asset_id = COALESCE(provider_asset_id, ?2),
                             provider_playback_id = COALESCE(provider_playback_id, ?3),
                             status = 'processing',
                             progress = 0,
                             bitrates = ?4,
                             failure_reason = NULL,
                             transcoding_started_at = ?5,
                             updated_at = CURRENT_TIMESTAMP
                         WHERE local_stream_id = ?1 AND status IN {ACTIVE_STATUSES}"
                    ),
                    params![
                        stream_id,
                        &record.provider_asset_id,
                        &record.provider_playback_id,
                        VideoStream::join_list(&record.bitrates),
                        record.started_at.naive_utc(),
                    ],
                )
            },
        )
    }

    fn adopt(&self, stream_id: &str, source: &VideoStream) -> StoreResult<bool> {
        let completed = source.status == StreamStatus::Completed;
        let (status, progress) = if completed {
            (StreamStatus::Completed, 100)
        } else {
            (StreamStatus::Processing, source.progress)
        };
        let note = format!("reused asset of {}", source.local_stream_id);
        let urls = source.urls.as_ref();
        self.transition(stream_id, status, Some(&note), |tx| {
            tx.execute(
                "UPDATE video_streams
                 SET provider_asset_id = COALESCE(provider_asset_id, ?2),
                     provider_playback_id = COALESCE(provider_playback_id, ?3),
                     status = ?4,
                     progress = ?5,
                     duration_s = ?6,
                     width = ?7,
                     height = ?8,
                     resolutions = ?9,
                     bitrates = ?10,
                     hls_url = ?11,
                     dash_url = ?12,
                     thumbnail_url = ?13,
                     poster_url = ?14,
                     thumbnail_small_url = ?15,
                     transcoding_started_at = ?16,
                     transcoding_completed_at = ?17,
                     completed_at = ?18,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE local_stream_id = ?1 AND status = 'queued'",
                params![
                    stream_id,
                    &source.provider_asset_id,
                    &source.provider_playback_id,
                    status.as_str(),
                    progress as i64,
                    source.duration,
                    source.width.map(|v| v as i64),
                    source.height.map(|v| v as i64),
                    VideoStream::join_list(&source.resolutions),
                    VideoStream::join_list(&source.bitrates),
                    urls.map(|u| u.hls.clone()),
                    urls.map(|u| u.dash.clone()),
                    urls.map(|u| u.thumbnail.clone()),
                    urls.map(|u| u.poster.clone()),
                    urls.map(|u| u.thumbnail_small.clone()),
                    source.transcoding_started_at.map(|dt| dt.naive_utc()),
                    source.transcoding_completed_at.map(|dt| dt.naive_utc()),
                    source.completed_at.map(|dt| dt.naive_utc()),
                ],
            )
        })
    }

    fn record_failure(&self, stream_id: &str, reason: &str) -> StoreResult<bool> {
        self.transition(stream_id, StreamStatus::Failed, Some(reason), |tx| {
            tx.execute(
                &format!(
                    "UPDATE video_streams
                     SET status = 'failed',
                         progress = 0,
                         failure_reason = ?2,
                         updated_at = CURRENT_TIMESTAMP
                     WHERE local_stream_id = ?1 AND status IN {ACTIVE_STATUSES}"
                ),
                params![stream_id, reason],
            )
        })
    }

    fn record_completion(
        &self,
        stream_id: &str,
        record: &CompletionRecord,
    ) -> StoreResult<bool> {
        let urls = record.urls.as_ref();
        self.transition(
            stream_id,
            StreamStatus::Completed,
            Some("provider reported ready"),
            |tx| {
                tx.execute(
                    &format!(
                        "UPDATE video_streams
                         SET status = 'completed',
                             progress = 100,
                             provider_playback_id = COALESCE(provider_playback_id, ?2),
                             duration_s = COALESCE(?3, duration_s),
                             width = COALESCE(?4, width),
                             height = COALESCE(?5, height),
                             resolutions = ?6,
                             hls_url = COALESCE(?7, hls_url),
                             dash_url = COALESCE(?8, dash_url),
                             thumbnail_url = COALESCE(?9, thumbnail_url),
                             poster_url = COALESCE(?10, poster_url),
                             thumbnail_small_url = COALESCE(?11, thumbnail_small_url),
                             failure_reason = NULL,
                             transcoding_completed_at = ?12,
                             completed_at = ?12,
                             updated_at = CURRENT_TIMESTAMP
                         WHERE local_stream_id = ?1 AND status IN {ACTIVE_STATUSES}"
                    ),
                    params![
                        stream_id,
                        &record.provider_playback_id,
                        record.duration,
                        record.width.map(|v| v as i64),
                        record.height.map(|v| v as i64),
                        VideoStream::join_list(&record.resolutions),
                        urls.map(|u| u.hls.clone()),
                        urls.map(|u| u.dash.clone()),
                        urls.map(|u| u.thumbnail.clone()),
                        urls.map(|u| u.poster.clone()),
                        urls.map(|u| u.thumbnail_small.clone()),
                        record.completed_at.naive_utc(),
                    ],
                )
            },
        )
    }

    fn record_progress(&self, stream_id: &str, progress: u8) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            &format!(
                "UPDATE video_streams
                 SET progress = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE local_stream_id = ?1 AND status IN {ACTIVE_STATUSES} AND progress < ?2"
            ),
            params![stream_id, progress.min(100) as i64],
        )?;
        Ok(affected > 0)
    }

    fn mark_cancelled(&self, stream_id: &str) -> StoreResult<bool> {
        self.transition(
            stream_id,
            StreamStatus::Cancelled,
            Some("cancelled by operator"),
            |tx| {
                tx.execute(
                    &format!(
                        "UPDATE video_streams
                         SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
                         WHERE local_stream_id = ?1 AND status IN {ACTIVE_STATUSES}"
                    ),
                    [stream_id],
                )
            },
        )
    }

    fn remove(&self, stream_id: &str) -> StoreResult<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "DELETE FROM video_streams WHERE local_stream_id = ?1",
            [stream_id],
        )?;
        tx.execute(
            "DELETE FROM stream_transitions WHERE local_stream_id = ?1",
            [stream_id],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    fn list(&self, filter: &StreamFilter) -> StoreResult<Vec<VideoStream>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM video_streams
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY (uploaded_at IS NULL) ASC, uploaded_at DESC
             LIMIT ?2",
        )?;
        let limit = filter.limit.map(|value| value as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(
                params![filter.status.as_ref().map(StreamStatus::as_str), limit],
                |row| VideoStream::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn history(&self, stream_id: &str) -> StoreResult<Vec<StatusTransition>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM stream_transitions WHERE local_stream_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([stream_id], |row| StatusTransition::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn fetch(conn: &Connection, stream_id: &str) -> StoreResult<Option<VideoStream>> {
    let mut stmt = conn.prepare("SELECT * FROM video_streams WHERE local_stream_id = ?1")?;
    let stream = stmt
        .query_row([stream_id], |row| VideoStream::from_row(row))
        .optional()?;
    Ok(stream)
}

fn current_status(conn: &Connection, stream_id: &str) -> StoreResult<Option<StreamStatus>> {
    let status = conn
        .query_row(
            "SELECT status FROM video_streams WHERE local_stream_id = ?1",
            [stream_id],
            |row| row.get::<_, StreamStatus>(0),
        )
        .optional()?;
    Ok(status)
}

fn insert_transition(
    conn: &Connection,
    stream_id: &str,
    from: Option<StreamStatus>,
    to: StreamStatus,
    note: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO stream_transitions (local_stream_id, status_from, status_to, note)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            stream_id,
            from.map(|status| status.as_str().to_string()),
            to.as_str(),
            note,
        ],
    )?;
    Ok(())
}
