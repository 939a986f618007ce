//! Dual-store persistence for processed calls.
//!
//! Each call is written twice, independently:
//! 1. A normalized [`PersistedRecord`] upserted into the structured store
//! 2. The full original event archived as pretty JSON in the blob store,
//!    then read back and checked
//!
//! Neither write retries and a failure in one never skips the other. The
//! platform redelivers webhooks that were not acknowledged, which is what
//! drives eventual consistency.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::call::{CallEvent, PersistedRecord};
use crate::store::{encode_segment, BlobStore, StoreError, StoreResult, StructuredStore};

/// Default bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

const BLOB_CONTENT_TYPE: &str = "application/json";

/// Literal that every archived event contains.
const READBACK_MARKER: &str = "\"conversation_id\"";

/// Candidate keys tried before giving up on finding a free blob key.
const MAX_KEY_ATTEMPTS: u32 = 16;

/// Per-store result of one persist attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub structured_store_ok: bool,
    pub blob_store_ok: bool,
    /// Key the archive copy was written under, if the put succeeded
    pub blob_key: Option<String>,
}

impl PersistOutcome {
    pub fn fully_persisted(&self) -> bool {
        self.structured_store_ok && self.blob_store_ok
    }
}

/// Writes calls to the structured store and the blob store.
#[derive(Clone)]
pub struct Persister {
    structured: Arc<dyn StructuredStore>,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl Persister {
    pub fn new(structured: Arc<dyn StructuredStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            structured,
            blobs,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist one call event to both stores.
    pub async fn persist(&self, event: &CallEvent) -> PersistOutcome {
        let now = Utc::now();
        let conversation_id = event.conversation_id();

        info!(conversation_id = %conversation_id, "persist_start");

        let structured_store_ok = self.write_record(event, now).await;
        let (blob_store_ok, blob_key) = self.write_archive(event, now).await;

        let outcome = PersistOutcome {
            structured_store_ok,
            blob_store_ok,
            blob_key,
        };

        info!(
            conversation_id = %conversation_id,
            structured_store_ok = outcome.structured_store_ok,
            blob_store_ok = outcome.blob_store_ok,
            blob_key = ?outcome.blob_key,
            "persist_complete"
        );

        outcome
    }

    async fn write_record(&self, event: &CallEvent, now: DateTime<Utc>) -> bool {
        let record = PersistedRecord::from_event(event, now);

        match self.bounded(self.structured.put_record(&record)).await {
            Ok(()) => {
                info!(
                    conversation_id = %record.conversation_id,
                    timestamp = record.timestamp,
                    "structured_store_saved"
                );
                true
            }
            Err(e) => {
                error!(
                    conversation_id = %record.conversation_id,
                    timestamp = record.timestamp,
                    error = %e,
                    "structured_store_failed"
                );
                false
            }
        }
    }

    async fn write_archive(&self, event: &CallEvent, now: DateTime<Utc>) -> (bool, Option<String>) {
        let conversation_id = event.conversation_id();

        let body = match serde_json::to_vec_pretty(&event.raw) {
            Ok(body) => body,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "blob_store_serialize_failed");
                return (false, None);
            }
        };

        let key = match self.free_key(conversation_id, now).await {
            Ok(key) => key,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "blob_store_failed");
                return (false, None);
            }
        };

        let body_length = body.len();
        if let Err(e) = self
            .bounded(self.blobs.put_object(&key, body, BLOB_CONTENT_TYPE))
            .await
        {
            error!(conversation_id = %conversation_id, key = %key, error = %e, "blob_store_failed");
            return (false, None);
        }

        info!(
            conversation_id = %conversation_id,
            key = %key,
            body_length = body_length,
            "blob_store_written"
        );

        let verified = self.verify_archive(conversation_id, &key).await;
        (verified, Some(key))
    }

    /// Read the object back and check it is the event that was written.
    async fn verify_archive(&self, conversation_id: &str, key: &str) -> bool {
        let content = match self.bounded(self.blobs.get_object(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(conversation_id = %conversation_id, key = %key, "blob_store_readback_missing");
                return false;
            }
            Err(e) => {
                error!(
                    conversation_id = %conversation_id,
                    key = %key,
                    error = %e,
                    "blob_store_readback_failed"
                );
                return false;
            }
        };

        let content = String::from_utf8_lossy(&content);
        if content.contains(conversation_id) || content.contains(READBACK_MARKER) {
            info!(conversation_id = %conversation_id, key = %key, "blob_store_verified");
            true
        } else {
            warn!(
                conversation_id = %conversation_id,
                key = %key,
                content_length = content.len(),
                "blob_store_content_mismatch"
            );
            false
        }
    }

    /// First unused key for this write, advancing the sub-second suffix on
    /// collision so repeated deliveries never overwrite each other.
    async fn free_key(&self, conversation_id: &str, now: DateTime<Utc>) -> StoreResult<String> {
        for attempt in 0..MAX_KEY_ATTEMPTS {
            let at = now + chrono::Duration::microseconds(i64::from(attempt));
            let key = blob_key(conversation_id, at);
            if !self.bounded(self.blobs.exists(&key)).await? {
                return Ok(key);
            }
        }
        Err(StoreError::KeysExhausted(format!(
            "{} after {} attempts",
            conversation_id, MAX_KEY_ATTEMPTS
        )))
    }

    async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

/// `calls/<id>/<id>_<YYYYmmdd_HHMMSS_nnnnnnnnn>.json`, with `<id>` passed
/// through [`encode_segment`].
pub fn blob_key(conversation_id: &str, written_at: DateTime<Utc>) -> String {
    format!(
        "calls/{id}/{id}_{ts}.json",
        id = encode_segment(conversation_id),
        ts = written_at.format("%Y%m%d_%H%M%S_%9f")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        LocalBlobStore, LocalStructuredStore, MemoryBlobStore, MemoryStructuredStore,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    struct FailingStructuredStore;

    #[async_trait]
    impl StructuredStore for FailingStructuredStore {
        async fn put_record(&self, _record: &PersistedRecord) -> StoreResult<()> {
            Err(StoreError::Unavailable("table offline".to_string()))
        }

        async fn get_record(&self, _id: &str, _ts: i64) -> StoreResult<Option<PersistedRecord>> {
            Err(StoreError::Unavailable("table offline".to_string()))
        }

        async fn scan(&self) -> StoreResult<Vec<PersistedRecord>> {
            Err(StoreError::Unavailable("table offline".to_string()))
        }
    }

    struct HangingStructuredStore;

    #[async_trait]
    impl StructuredStore for HangingStructuredStore {
        async fn put_record(&self, _record: &PersistedRecord) -> StoreResult<()> {
            std::future::pending().await
        }

        async fn get_record(&self, _id: &str, _ts: i64) -> StoreResult<Option<PersistedRecord>> {
            std::future::pending().await
        }

        async fn scan(&self) -> StoreResult<Vec<PersistedRecord>> {
            std::future::pending().await
        }
    }

    /// Blob store that accepts writes but returns unrelated content.
    struct CorruptingBlobStore;

    #[async_trait]
    impl BlobStore for CorruptingBlobStore {
        async fn put_object(&self, _key: &str, _body: Vec<u8>, _ct: &str) -> StoreResult<()> {
            Ok(())
        }

        async fn get_object(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
            Ok(Some(b"<html>wrong object</html>".to_vec()))
        }

        async fn exists(&self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }

        async fn list_objects(&self, _prefix: &str) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    /// Blob store in which every key is already taken.
    struct FullBlobStore;

    #[async_trait]
    impl BlobStore for FullBlobStore {
        async fn put_object(&self, _key: &str, _body: Vec<u8>, _ct: &str) -> StoreResult<()> {
            Ok(())
        }

        async fn get_object(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn exists(&self, _key: &str) -> StoreResult<bool> {
            Ok(true)
        }

        async fn list_objects(&self, _prefix: &str) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn event() -> CallEvent {
        CallEvent::from_value(json!({
            "type": "post_call_transcription",
            "event_timestamp": 1000,
            "data": {
                "conversation_id": "abc123",
                "agent_id": "agent_1",
                "transcript": [{"role": "user", "message": "help"}],
                "analysis": {"transcript_summary": "test", "call_successful": "success"},
                "metadata": {"call_duration_secs": 42}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_persist_writes_both_stores() {
        let rows = MemoryStructuredStore::new();
        let blobs = MemoryBlobStore::new();
        let persister = Persister::new(Arc::new(rows.clone()), Arc::new(blobs.clone()));

        let outcome = persister.persist(&event()).await;

        assert!(outcome.fully_persisted());
        let row = rows.get_record("abc123", 1000).await.unwrap().unwrap();
        assert_eq!(row.summary, "test");
        assert_eq!(row.duration_secs, 42);
        assert_eq!(row.transcript_length, 1);

        let keys = blobs.list_objects("calls/abc123/").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(outcome.blob_key.as_deref(), Some(keys[0].as_str()));

        let archived = blobs.get_object(&keys[0]).await.unwrap().unwrap();
        let archived: serde_json::Value = serde_json::from_slice(&archived).unwrap();
        assert_eq!(archived, event().raw);
        // Pretty printed, not compact.
        assert!(String::from_utf8(blobs.get_object(&keys[0]).await.unwrap().unwrap())
            .unwrap()
            .contains('\n'));
    }

    #[tokio::test]
    async fn test_persist_twice_one_row_two_objects() {
        let rows = MemoryStructuredStore::new();
        let blobs = MemoryBlobStore::new();
        let persister = Persister::new(Arc::new(rows.clone()), Arc::new(blobs.clone()));

        let first = persister.persist(&event()).await;
        let second = persister.persist(&event()).await;

        assert!(first.fully_persisted());
        assert!(second.fully_persisted());
        assert_eq!(rows.len().await, 1);
        assert_eq!(blobs.list_objects("calls/abc123/").await.unwrap().len(), 2);
        assert_ne!(first.blob_key, second.blob_key);
    }

    #[tokio::test]
    async fn test_structured_failure_still_writes_blob() {
        let blobs = MemoryBlobStore::new();
        let persister = Persister::new(Arc::new(FailingStructuredStore), Arc::new(blobs.clone()));

        let outcome = persister.persist(&event()).await;

        assert!(!outcome.structured_store_ok);
        assert!(outcome.blob_store_ok);
        assert_eq!(blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_readback_mismatch_is_failure() {
        let rows = MemoryStructuredStore::new();
        let persister = Persister::new(Arc::new(rows.clone()), Arc::new(CorruptingBlobStore));

        let outcome = persister.persist(&event()).await;

        assert!(outcome.structured_store_ok);
        assert!(!outcome.blob_store_ok);
        assert!(outcome.blob_key.is_some());
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let blobs = MemoryBlobStore::new();
        let persister = Persister::new(Arc::new(HangingStructuredStore), Arc::new(blobs.clone()))
            .with_timeout(Duration::from_millis(20));

        let outcome = persister.persist(&event()).await;

        assert!(!outcome.structured_store_ok);
        assert!(outcome.blob_store_ok);
    }

    #[tokio::test]
    async fn test_free_key_skips_taken_key() {
        let blobs = MemoryBlobStore::new();
        let persister = Persister::new(Arc::new(MemoryStructuredStore::new()), Arc::new(blobs.clone()));
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();

        let taken = blob_key("abc123", now);
        blobs.put_object(&taken, b"{}".to_vec(), BLOB_CONTENT_TYPE).await.unwrap();

        let key = persister.free_key("abc123", now).await.unwrap();
        assert_ne!(key, taken);
        assert!(key.starts_with("calls/abc123/abc123_20260304_050607_"));
    }

    #[tokio::test]
    async fn test_free_key_exhausted() {
        let persister = Persister::new(Arc::new(MemoryStructuredStore::new()), Arc::new(FullBlobStore));
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();

        let result = persister.free_key("abc123", now).await;
        assert!(matches!(result, Err(StoreError::KeysExhausted(_))));

        let outcome = persister.persist(&event()).await;
        assert!(outcome.structured_store_ok);
        assert!(!outcome.blob_store_ok);
        assert!(outcome.blob_key.is_none());
    }

    #[tokio::test]
    async fn test_slashed_id_lands_in_both_local_stores() {
        let dir = tempfile::TempDir::new().unwrap();
        let rows = LocalStructuredStore::new(dir.path(), "table");
        let blobs = LocalBlobStore::new(dir.path(), "bucket");
        let persister = Persister::new(Arc::new(rows.clone()), Arc::new(blobs.clone()));

        let event = CallEvent::from_value(json!({
            "type": "post_call_transcription",
            "event_timestamp": 1000,
            "data": {"conversation_id": "conv/1"}
        }))
        .unwrap();

        let outcome = persister.persist(&event).await;

        assert!(outcome.fully_persisted());
        let key = outcome.blob_key.unwrap();
        assert!(key.starts_with("calls/conv%2F1/conv%2F1_"), "key {}", key);
        assert_eq!(blobs.list_objects("calls/conv%2F1/").await.unwrap(), vec![key]);

        let row = rows.get_record("conv/1", 1000).await.unwrap().unwrap();
        assert_eq!(row.conversation_id, "conv/1");
    }

    #[test]
    fn test_blob_key_encodes_id() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            blob_key("conv/1", at),
            "calls/conv%2F1/conv%2F1_20260304_050607_000000000.json"
        );
        assert_eq!(
            blob_key("..", at),
            "calls/%2E%2E/%2E%2E_20260304_050607_000000000.json"
        );
    }

    #[test]
    fn test_blob_key_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            blob_key("abc123", at),
            "calls/abc123/abc123_20260304_050607_000000000.json"
        );
    }
}
