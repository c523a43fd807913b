//! In-memory ObjectStore for tests and ephemeral runs

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stampede_core::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ObjectMetadata, ObjectStore};

/// Operation recorded in the call history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put(String),
    Get(String),
    Delete(String),
    List(String),
}

/// In-memory object store
///
/// Cloning shares the same underlying objects. Every operation is appended to a call history
/// for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>>,
    history: Arc<RwLock<Vec<StoreCall>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn get_call_history(&self) -> Vec<StoreCall> {
        self.history.read().clone()
    }

    /// Number of `put` calls so far
    pub fn put_count(&self) -> usize {
        self.history
            .read()
            .iter()
            .filter(|c| matches!(c, StoreCall::Put(_)))
            .count()
    }

    fn record(&self, call: StoreCall) {
        self.history.write().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        self.record(StoreCall::Put(key.to_string()));
        if key.is_empty() {
            return Err(CoreError::ValidationError(
                "Key cannot be empty".to_string(),
            ));
        }
        self.objects
            .write()
            .insert(key.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        self.record(StoreCall::Get(key.to_string()));
        self.objects
            .read()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| CoreError::not_found("object", key))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.record(StoreCall::Delete(key.to_string()));
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>> {
        self.record(StoreCall::List(prefix.to_string()));
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (data, modified))| ObjectMetadata {
                key: key.clone(),
                size_bytes: data.len() as u64,
                last_modified: *modified,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        self.objects
            .read()
            .get(key)
            .map(|(data, modified)| ObjectMetadata {
                key: key.to_string(),
                size_bytes: data.len() as u64,
                last_modified: *modified,
            })
            .ok_or_else(|| CoreError::not_found("object", key))
    }
}
