//! Object storage for archived compliance documents.
//!
//! Production deployments write to an S3-compatible bucket; when no bucket is
//! configured, or the bucket cannot be reached, [`FallbackObjectStore`] keeps the
//! same contract against the local filesystem.

pub mod local;
pub mod s3;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::StorageConfig;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutReceipt {
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PutReceipt, StorageError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError>;
}

/// Reject keys that could escape the bucket root or the fallback directory.
pub(crate) fn validate_key(key: &str) -> Result<&str, StorageError> {
    let trimmed = key.trim_start_matches('/');
    if trimmed.is_empty()
        || trimmed.split('/').any(|segment| segment == ".." || segment == ".")
        || trimmed.contains('\\')
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(trimmed)
}

/// Routes to the remote store and falls back to disk when it is missing or unreachable.
pub struct FallbackObjectStore {
    primary: Option<Arc<dyn ObjectStore>>,
    local: LocalObjectStore,
}

impl FallbackObjectStore {
    pub fn new(primary: Option<Arc<dyn ObjectStore>>, local: LocalObjectStore) -> Self {
        Self { primary, local }
    }

    pub async fn from_config(config: &StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
        let local = LocalObjectStore::new(&config.local_dir).await?;
        let primary = match &config.s3 {
            Some(s3) => Some(Arc::new(S3ObjectStore::new(s3.clone(), timeout)?) as Arc<dyn ObjectStore>),
            None => {
                tracing::info!(dir = %config.local_dir.display(), "no bucket configured; using filesystem storage");
                None
            }
        };
        Ok(Self::new(primary, local))
    }

    fn degrade(operation: &str, key: &str, err: &StorageError) {
        tracing::warn!(operation, key, error = %err, "object store unreachable; using filesystem fallback");
    }
}

#[async_trait]
impl ObjectStore for FallbackObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PutReceipt, StorageError> {
        if let Some(primary) = &self.primary {
            match primary.put(key, bytes.clone(), content_type, metadata).await {
                Err(StorageError::Unavailable(reason)) => {
                    Self::degrade("put", key, &StorageError::Unavailable(reason));
                }
                other => return other,
            }
        }
        self.local.put(key, bytes, content_type, metadata).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if let Some(primary) = &self.primary {
            match primary.get(key).await {
                Err(err @ StorageError::Unavailable(_)) => Self::degrade("get", key, &err),
                // Objects written while the bucket was down only exist on disk.
                Err(StorageError::NotFound(_)) => {}
                other => return other,
            }
        }
        self.local.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if let Some(primary) = &self.primary {
            match primary.delete(key).await {
                Err(err @ StorageError::Unavailable(_)) => Self::degrade("delete", key, &err),
                Err(StorageError::NotFound(_)) | Ok(()) => {}
                Err(other) => return Err(other),
            }
        }
        match self.local.delete(key).await {
            Err(StorageError::NotFound(_)) if self.primary.is_some() => Ok(()),
            other => other,
        }
    }

    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        if self.local.contains(key).await {
            return self.local.sign(key, ttl).await;
        }
        match &self.primary {
            Some(primary) => primary.sign(key, ttl).await,
            None => self.local.sign(key, ttl).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = match &self.primary {
            Some(primary) => match primary.list(prefix).await {
                Ok(entries) => entries,
                Err(err @ StorageError::Unavailable(_)) => {
                    Self::degrade("list", prefix, &err);
                    Vec::new()
                }
                Err(other) => return Err(other),
            },
            None => Vec::new(),
        };

        for entry in self.local.list(prefix).await? {
            if !entries.iter().any(|existing| existing.key == entry.key) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
