use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::stream::{StoreResult, StreamRepository, VideoStream};

/// An earlier upload whose provider asset can be reused.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DedupHit {
    pub provider_asset_id: String,
    pub provider_playback_id: Option<String>,
    pub source_stream_id: String,
    #[serde(skip)]
    source: VideoStream,
}

impl DedupHit {
    pub fn source(&self) -> &VideoStream {
        &self.source
    }
}

/// Content-hash lookup over the stream store.
///
/// There is no lock between `lookup` and `claim`: two concurrent uploads of
/// the same bytes can both miss and create two provider assets. Both records
/// stay valid; only the provider-side storage is duplicated.
#[derive(Clone)]
pub struct DeduplicationIndex {
    store: Arc<dyn StreamRepository>,
}

impl DeduplicationIndex {
    pub fn new(store: Arc<dyn StreamRepository>) -> Self {
        Self { store }
    }

    pub fn lookup(&self, content_hash: &str, exclude: &str) -> StoreResult<Option<DedupHit>> {
        let Some(source) = self.store.find_by_hash(content_hash, exclude)? else {
            debug!(content_hash, "no earlier upload with this content");
            return Ok(None);
        };
        let Some(provider_asset_id) = source.provider_asset_id.clone() else {
            return Ok(None);
        };
        Ok(Some(DedupHit {
            provider_asset_id,
            provider_playback_id: source.provider_playback_id.clone(),
            source_stream_id: source.local_stream_id.clone(),
            source,
        }))
    }

    /// Points `stream_id` at the hit's asset, copying its current state.
    pub fn claim(&self, stream_id: &str, hit: &DedupHit) -> StoreResult<bool> {
        let claimed = self.store.adopt(stream_id, &hit.source)?;
        if claimed {
            info!(
                stream_id,
                source = %hit.source_stream_id,
                asset_id = %hit.provider_asset_id,
                status = %hit.source.status,
                "reused provider asset"
            );
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::QualityTier;
    use crate::stream::{NewStream, SqliteStreamStore, StreamStatus, SubmissionRecord};
    use chrono::Utc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<SqliteStreamStore> {
        let store = SqliteStreamStore::new(dir.path().join("streams.sqlite")).unwrap();
        store.initialize().unwrap();
        Arc::new(store)
    }

    fn register(store: &SqliteStreamStore, id: &str, hash: &str) {
        store
            .register(&NewStream {
                local_stream_id: id.into(),
                title: None,
                quality: QualityTier::Standard,
                file_size: 10,
                format: "mp4".into(),
                uploaded_at: Utc::now(),
            })
            .unwrap();
        store.set_content_hash(id, hash).unwrap();
    }

    #[test]
    fn lookup_finds_submitted_upload_and_claim_copies_it() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        register(&store, "first", "abc");
        store
            .record_submission(
                "first",
                &SubmissionRecord {
                    provider_asset_id: "asset-1".into(),
                    provider_playback_id: "pb-1".into(),
                    bitrates: vec!["3000k".into()],
                    started_at: Utc::now(),
                },
            )
            .unwrap();
        register(&store, "second", "abc");

        let index = DeduplicationIndex::new(store.clone());
        assert!(index.lookup("abc", "first").unwrap().is_none());
        let hit = index.lookup("abc", "second").unwrap().unwrap();
        assert_eq!(hit.provider_asset_id, "asset-1");
        assert_eq!(hit.provider_playback_id.as_deref(), Some("pb-1"));
        assert_eq!(hit.source_stream_id, "first");

        assert!(index.claim("second", &hit).unwrap());
        let second = store.get("second").unwrap().unwrap();
        assert_eq!(second.status, StreamStatus::Processing);
        assert_eq!(second.provider_asset_id.as_deref(), Some("asset-1"));
        assert_eq!(second.bitrates, vec!["3000k".to_string()]);
    }

    #[test]
    fn records_without_an_asset_are_not_hits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        register(&store, "first", "abc");
        register(&store, "second", "abc");
        let index = DeduplicationIndex::new(store);
        assert!(index.lookup("abc", "second").unwrap().is_none());
    }
}
