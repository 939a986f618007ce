//! Storage seams for persisted calls.
//!
//! Two independent stores receive every processed call:
//! - a structured store holding one [`PersistedRecord`] per
//!   `(conversation_id, timestamp)` key
//! - a blob store holding the full event as a JSON object per write
//!
//! Both are traits so the persister can run against in-memory doubles in
//! tests and directory-backed stores in deployments.

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::call::PersistedRecord;

pub use local::{LocalBlobStore, LocalStructuredStore};
pub use memory::{MemoryBlobStore, MemoryStructuredStore};

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error("store call timed out after {0} ms")]
    Timeout(u64),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no free object key: {0}")]
    KeysExhausted(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Encode a conversation id for use as a single key or path segment.
///
/// `%`, `/` and `\` are percent-encoded and the dot segments `.` and `..`
/// are spelled `%2E`. Plain ids come back unchanged, so both stores agree on
/// where any id lives.
pub fn encode_segment(id: &str) -> String {
    if id == "." || id == ".." {
        return "%2E".repeat(id.len());
    }

    let mut encoded = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            '\\' => encoded.push_str("%5C"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Row store with a composite `(conversation_id, timestamp)` key.
///
/// `put_record` is an upsert: writing an existing key replaces the row.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    async fn put_record(&self, record: &PersistedRecord) -> StoreResult<()>;

    async fn get_record(
        &self,
        conversation_id: &str,
        timestamp: i64,
    ) -> StoreResult<Option<PersistedRecord>>;

    /// All rows ordered by key.
    async fn scan(&self) -> StoreResult<Vec<PersistedRecord>>;
}

/// Object store addressed by slash-separated keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> StoreResult<()>;

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Keys beginning with `prefix`, in lexical order.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
