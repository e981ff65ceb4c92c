use crate::error::StorageError;
use crate::traits::ObjectStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Object store laid out as `<root>/<bucket>/<key>` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for (kind, part) in [("bucket", bucket), ("key", key)] {
            let relative = Path::new(part);
            let is_plain = !part.is_empty()
                && relative
                    .components()
                    .all(|component| matches!(component, Component::Normal(_)));
            if !is_plain {
                return Err(StorageError::InvalidKey(format!("{kind} `{part}`")));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), size = bytes.len(), "object read");
                Ok(bytes)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "object written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_returns_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalObjectStore::new(dir.path());

        store
            .put("paper-texts", "user/u-1/papers/p-1.txt", b"hello world")
            .await?;
        let bytes = store.get("paper-texts", "user/u-1/papers/p-1.txt").await?;

        assert_eq!(bytes, b"hello world");
        assert!(dir.path().join("paper-texts/user/u-1/papers/p-1.txt").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalObjectStore::new(dir.path());

        let error = store.get("paper-texts", "nothing.txt").await.unwrap_err();
        assert!(matches!(error, StorageError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn escaping_keys_are_rejected() {
        let store = LocalObjectStore::new("/tmp/objects");
        for key in ["../secret", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(store.object_path("bucket", key), Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
        assert!(store.object_path("..", "a.txt").is_err());
    }
}
