use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BlobStore, StoreResult, StructuredStore};
use crate::call::PersistedRecord;

/// In-memory structured store using a BTreeMap keyed by
/// `(conversation_id, timestamp)`.
#[derive(Clone, Default)]
pub struct MemoryStructuredStore {
    rows: Arc<RwLock<BTreeMap<(String, i64), PersistedRecord>>>,
}

impl MemoryStructuredStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl StructuredStore for MemoryStructuredStore {
    async fn put_record(&self, record: &PersistedRecord) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        rows.insert(
            (record.conversation_id.clone(), record.timestamp),
            record.clone(),
        );
        Ok(())
    }

    async fn get_record(
        &self,
        conversation_id: &str,
        timestamp: i64,
    ) -> StoreResult<Option<PersistedRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(conversation_id.to_string(), timestamp)).cloned())
    }

    async fn scan(&self) -> StoreResult<Vec<PersistedRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.values().cloned().collect())
    }
}

/// In-memory blob store.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, _content_type: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let objects = self.objects.read().await;
        Ok(objects.contains_key(key))
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
