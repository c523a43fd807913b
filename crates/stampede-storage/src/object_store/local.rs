//! Local filesystem implementation of ObjectStore
//!
//! Objects are files under a base directory; keys are relative paths.

use super::{ObjectMetadata, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use stampede_core::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Local filesystem object store
///
/// Writes go to a sibling `.tmp` file that is renamed over the target, so a crash mid-write
/// never leaves a truncated session or index behind.
///
/// # Example
///
/// ```rust,no_run
/// use stampede_storage::object_store::{LocalObjectStore, ObjectStore};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> stampede_core::CoreResult<()> {
///     let store = LocalObjectStore::new("./sessions").await?;
///     store.put("sessions/abc.json", Bytes::from("{}")).await?;
///
///     let objects = store.list("sessions/").await?;
///     println!("Found {} objects", objects.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_dir: PathBuf,
}

impl LocalObjectStore {
    /// Create a new local object store, creating the base directory if needed
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IoError` if directory creation fails
    pub async fn new(base_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn path_to_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Recursively list all files under a directory
    fn list_recursive<'a>(
        &'a self,
        dir: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<Vec<PathBuf>>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut results = Vec::new();

            let mut read_dir = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;

                if metadata.is_file() {
                    if path.extension().map_or(false, |ext| ext == "tmp") {
                        continue;
                    }
                    results.push(path);
                } else if metadata.is_dir() {
                    let mut sub_results = self.list_recursive(&path).await?;
                    results.append(&mut sub_results);
                }
            }

            Ok(results)
        })
    }

    fn metadata_for(&self, key: String, metadata: &std::fs::Metadata) -> ObjectMetadata {
        ObjectMetadata {
            key,
            size_bytes: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
                .unwrap_or_else(Utc::now),
        }
    }
}

fn storage_error(op: &str, key: &str, err: std::io::Error) -> CoreError {
    CoreError::StorageError(format!("{op} `{key}` failed: {err}"))
}

fn not_found_or_storage(op: &str, key: &str, err: std::io::Error) -> CoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        CoreError::not_found("object", key)
    } else {
        storage_error(op, key, err)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::ValidationError(
                "Key cannot be empty".to_string(),
            ));
        }

        let path = self.full_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("put", key, e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| storage_error("put", key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("put", key, e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        let data = tokio::fs::read(self.full_path(key))
            .await
            .map_err(|e| not_found_or_storage("get", key, e))?;
        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(tokio::fs::try_exists(self.full_path(key))
            .await
            .unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        match tokio::fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>> {
        let prefix_path = self.full_path(prefix);
        if !tokio::fs::try_exists(&prefix_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let is_dir = tokio::fs::metadata(&prefix_path)
            .await
            .map_err(|e| storage_error("list", prefix, e))?
            .is_dir();
        let files = if is_dir {
            self.list_recursive(&prefix_path)
                .await
                .map_err(|e| CoreError::StorageError(format!("list `{prefix}` failed: {e}")))?
        } else {
            vec![prefix_path]
        };

        let mut results = Vec::with_capacity(files.len());
        for path in files {
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                if let Some(key) = self.path_to_key(&path) {
                    results.push(self.metadata_for(key, &metadata));
                }
            }
        }

        Ok(results)
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        let metadata = tokio::fs::metadata(self.full_path(key))
            .await
            .map_err(|e| not_found_or_storage("head", key, e))?;
        if !metadata.is_file() {
            return Err(CoreError::not_found("object", key));
        }
        Ok(self.metadata_for(key.to_string(), &metadata))
    }
}
