use crate::error::VmError;
use std::path::{Path, PathBuf};
use tokio::fs;

const DEFAULT_BASE: &str = "/opt/cinder";

const MICROVMS_DIR: &str = "microvms";
const ASSETS_DIR: &str = "assets";
const IMAGES_DIR: &str = "images";

/// All on-disk locations derive from one base directory, resolved exactly
/// once when the context is built and passed into the pipelines explicitly.
#[derive(Debug, Clone)]
pub struct CacheContext {
    base: PathBuf,
}

impl CacheContext {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn default_base() -> PathBuf {
        PathBuf::from(DEFAULT_BASE)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn microvms_dir(&self) -> PathBuf {
        self.base.join(MICROVMS_DIR)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.base.join(ASSETS_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base.join(IMAGES_DIR)
    }

    pub fn microvm_dir(&self, name: &str) -> PathBuf {
        self.microvms_dir().join(name)
    }

    /// Creates the cache layout if any of it is missing.
    pub async fn ensure_layout(&self) -> Result<(), VmError> {
        for dir in [self.microvms_dir(), self.assets_dir(), self.images_dir()] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}
