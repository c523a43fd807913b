//! Object storage abstraction for persisted sessions
//!
//! Keys are `/`-separated relative paths. Backends must make `put` replace an existing object
//! atomically from the reader's point of view and `delete` idempotent.

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::{MemoryObjectStore, StoreCall};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stampede_core::CoreResult;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,
}

/// Object store trait for session persistence
///
/// # Example
///
/// ```rust
/// use stampede_storage::object_store::{MemoryObjectStore, ObjectStore};
/// use bytes::Bytes;
///
/// # async fn example() -> stampede_core::CoreResult<()> {
/// let store = MemoryObjectStore::new();
/// store.put("sessions/a.json", Bytes::from("{}")).await?;
/// assert!(store.exists("sessions/a.json").await?);
/// assert_eq!(store.list("sessions/").await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any previous content
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty key, `StorageError` if the write fails
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()>;

    /// Retrieve an object
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object doesn't exist
    async fn get(&self, key: &str) -> CoreResult<Bytes>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> CoreResult<bool>;

    /// Delete an object (idempotent)
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// List objects whose key starts with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>>;

    /// Object metadata without fetching the data
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object doesn't exist
    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_metadata_serialization() {
        let metadata = ObjectMetadata {
            key: "sessions/a.json".to_string(),
            size_bytes: 1024,
            last_modified: Utc::now(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: ObjectMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, deserialized);
    }
}
