use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{validate_key, ObjectEntry, ObjectStore, PutReceipt, StorageError};

const METADATA_SUFFIX: &str = ".meta.json";

/// Filesystem store rooted at one directory. Metadata lives in a JSON sidecar
/// next to each object.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    etag: String,
    metadata: BTreeMap<String, String>,
}

impl LocalObjectStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }

    pub(crate) async fn contains(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }
}

fn not_found_or_io(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<ObjectEntry>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            walk(root, &path, entries)?;
            continue;
        }
        if path.to_string_lossy().ends_with(METADATA_SUFFIX) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(ObjectEntry {
            key,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PutReceipt, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let etag = hex::encode(Sha256::digest(&bytes));
        tokio::fs::write(&path, &bytes).await?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            etag: etag.clone(),
            metadata: metadata.clone(),
        };
        let encoded = serde_json::to_vec(&sidecar)
            .map_err(|err| StorageError::Io(std::io::Error::other(err)))?;
        tokio::fs::write(Self::sidecar_path(&path), encoded).await?;

        tracing::debug!(key, size = bytes.len(), "stored object on local filesystem");
        Ok(PutReceipt { etag })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))?;
        // Sidecar may be absent for objects copied in by hand.
        let _ = tokio::fs::remove_file(Self::sidecar_path(&path)).await;
        Ok(())
    }

    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("file://{}?expires={expires}", path.display()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let root = self.root.clone();
        let mut entries = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            walk(&root, &root, &mut entries).map(|_| entries)
        })
        .await
        .map_err(|err| StorageError::Io(std::io::Error::other(err)))??;

        let prefix = prefix.trim_start_matches('/');
        entries.retain(|entry| entry.key.starts_with(prefix));
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_object_and_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).await.expect("store");
        let mut metadata = BTreeMap::new();
        metadata.insert("employee-id".to_string(), "emp-1".to_string());

        let receipt = store
            .put("employees/emp-1/w4.pdf", b"pdf-bytes".to_vec(), "application/pdf", &metadata)
            .await
            .expect("put");

        assert_eq!(receipt.etag.len(), 64);
        let sidecar = std::fs::read_to_string(dir.path().join("employees/emp-1/w4.pdf.meta.json"))
            .expect("sidecar written");
        assert!(sidecar.contains("application/pdf"));
        assert!(sidecar.contains("emp-1"));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_skips_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).await.expect("store");
        for key in ["employees/a/1.pdf", "employees/a/2.pdf", "employees/b/1.pdf"] {
            store
                .put(key, vec![1, 2, 3], "application/pdf", &BTreeMap::new())
                .await
                .expect("put");
        }

        let listed = store.list("employees/a/").await.expect("list");
        let keys: Vec<_> = listed.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["employees/a/1.pdf", "employees/a/2.pdf"]);
        assert!(listed.iter().all(|entry| entry.size == 3));
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).await.expect("store");
        assert!(matches!(store.get("nope.pdf").await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("nope.pdf").await, Err(StorageError::NotFound(_))));
        assert!(matches!(
            store.sign("nope.pdf", Duration::from_secs(5)).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
