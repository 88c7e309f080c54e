use crate::error::ImageError;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Content-addressed on-disk cache for pulled image layers, keyed by the
/// manifest's layer digest. Unbounded; entries are only ever added.
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, ImageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a layer with this digest is (or would be) stored at.
    pub fn entry_path(&self, digest: &str) -> PathBuf {
        // "sha256:abcd" -> <root>/sha256/abcd
        match digest.split_once(':') {
            Some((algorithm, hash)) => self.root.join(algorithm).join(hash),
            None => self.root.join(digest),
        }
    }

    pub async fn contains(&self, digest: &str) -> bool {
        fs::try_exists(self.entry_path(digest)).await.unwrap_or(false)
    }

    /// Stores a layer blob, returning the path it now lives at.
    pub async fn put(&self, digest: &str, data: &[u8]) -> Result<PathBuf, ImageError> {
        let path = self.entry_path(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(path)
    }

    pub async fn get(&self, digest: &str) -> Result<Vec<u8>, ImageError> {
        let path = self.entry_path(digest);
        if !fs::try_exists(&path).await? {
            return Err(ImageError::LayerNotCached(digest.to_string()));
        }
        Ok(fs::read(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::open(dir.path()).await.unwrap();

        let digest = "sha256:deadbeef";
        assert!(!cache.contains(digest).await);

        cache.put(digest, b"layer bytes").await.unwrap();
        assert!(cache.contains(digest).await);
        assert_eq!(cache.get(digest).await.unwrap(), b"layer bytes");
    }

    #[tokio::test]
    async fn missing_layer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::open(dir.path()).await.unwrap();

        let err = cache.get("sha256:absent").await.unwrap_err();
        assert!(matches!(err, ImageError::LayerNotCached(_)));
    }

    #[tokio::test]
    async fn entries_are_split_by_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::open(dir.path()).await.unwrap();

        let path = cache.put("sha256:cafe", b"x").await.unwrap();
        assert_eq!(path, dir.path().join("sha256").join("cafe"));
    }
}
