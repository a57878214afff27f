//! Local disk media storage.

use async_trait::async_trait;
use bytes::Bytes;
use keel_core::storage::MediaStorage;
use keel_core::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Stores media under a local directory the application serves at `public_prefix`.
#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            public_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative object path under the root, refusing anything that escapes it.
    fn local_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!("invalid media path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaStorage for LocalDiskStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<String> {
        let target = self.local_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        debug!(path = %target.display(), bytes = data.len(), "Stored media locally");
        Ok(self.url_for(path))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let path = url
            .strip_prefix(&self.public_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::InvalidInput(format!("'{}' is not a local media URL", url)))?;
        match tokio::fs::remove_file(self.local_path(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.public_prefix, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path(), "/media/");

        let url = storage
            .upload("postCoverImages/p1__1__a.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(url, "/media/postCoverImages/p1__1__a.png");
        let stored = dir.path().join("postCoverImages/p1__1__a.png");
        assert_eq!(std::fs::read(&stored).unwrap(), b"png");

        storage.delete(&url).await.unwrap();
        assert!(!stored.exists());
        storage.delete(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_paths_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path(), "/media");
        for path in ["../secret", "/etc/passwd", "a/../../b", ""] {
            assert!(storage.upload(path, Bytes::new()).await.is_err(), "{}", path);
        }
        assert!(storage.delete("https://elsewhere/x.png").await.is_err());
    }
}
