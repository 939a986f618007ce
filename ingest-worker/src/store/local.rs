//! Directory-backed stores.
//!
//! Layout under the configured data directory:
//!
//! ```text
//! <table>/<conversation_id>/<timestamp>.json   one row per key
//! <bucket>/calls/<conversation_id>/...json     one file per object key
//! ```
//!
//! Conversation ids are stored under [`encode_segment`], the same spelling
//! the persister uses in blob keys.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use super::{encode_segment, BlobStore, StoreError, StoreResult, StructuredStore};
use crate::call::PersistedRecord;

/// Structured store keeping each row as a JSON file.
#[derive(Debug, Clone)]
pub struct LocalStructuredStore {
    root: PathBuf,
}

impl LocalStructuredStore {
    pub fn new(data_dir: impl AsRef<Path>, table: &str) -> Self {
        Self {
            root: data_dir.as_ref().join(table),
        }
    }

    fn row_path(&self, conversation_id: &str, timestamp: i64) -> StoreResult<PathBuf> {
        let partition = encode_segment(conversation_id);
        validate_component(&partition)?;
        Ok(self.root.join(partition).join(format!("{}.json", timestamp)))
    }
}

#[async_trait]
impl StructuredStore for LocalStructuredStore {
    async fn put_record(&self, record: &PersistedRecord) -> StoreResult<()> {
        let path = self.row_path(&record.conversation_id, record.timestamp)?;
        let body = serde_json::to_vec_pretty(record)?;
        write_file(&path, &body).await
    }

    async fn get_record(
        &self,
        conversation_id: &str,
        timestamp: i64,
    ) -> StoreResult<Option<PersistedRecord>> {
        let path = self.row_path(conversation_id, timestamp)?;
        match read_file(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self) -> StoreResult<Vec<PersistedRecord>> {
        let mut rows = Vec::new();

        if !fs::try_exists(&self.root).await? {
            return Ok(rows);
        }

        let mut partitions = fs::read_dir(&self.root).await?;
        while let Some(partition) = partitions.next_entry().await? {
            if !partition.file_type().await?.is_dir() {
                continue;
            }

            let mut entries = fs::read_dir(partition.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                let bytes = fs::read(&path).await?;
                match serde_json::from_slice::<PersistedRecord>(&bytes) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "structured_row_unreadable");
                    }
                }
            }
        }

        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }
}

/// Blob store mapping each object key to a file path.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(data_dir: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            root: data_dir.as_ref().join(bucket),
        }
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        for part in key.split('/') {
            validate_component(part)?;
            path.push(part);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, _content_type: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        write_file(&path, &body).await
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        read_file(&path).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();

        if !fs::try_exists(&self.root).await? {
            return Ok(keys);
        }

        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                let key = format!("{}{}", key_prefix, name);

                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}/", key)));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// A key segment must name exactly one directory entry.
fn validate_component(part: &str) -> StoreResult<()> {
    let mut components = Path::new(part).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !part.contains(['/', '\\']) => Ok(()),
        _ => Err(StoreError::InvalidKey(part.to_string())),
    }
}

async fn write_file(path: &Path, body: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, body).await?;
    Ok(())
}

async fn read_file(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
