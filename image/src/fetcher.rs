use crate::cache::LayerCache;
use crate::error::ImageError;
use crate::unpack::extract_layer;
use cinder_remote::{ImageReference, RegistryClient, RuntimeConfig};
use std::path::{Path, PathBuf};
use tokio::fs;

/// A pulled layer, resident in the layer cache.
#[derive(Debug, Clone)]
pub struct CachedLayer {
    pub digest: String,
    pub file: PathBuf,
}

/// Pulls container images and unpacks their layered filesystem. Layers are
/// served from the content-addressed cache when present and downloaded
/// (then cached) otherwise.
pub struct Fetcher {
    registry: RegistryClient,
    cache: LayerCache,
}

impl Fetcher {
    pub fn new(registry: RegistryClient, cache: LayerCache) -> Self {
        Self { registry, cache }
    }

    /// Resolves the image and pulls its layers in manifest order, returning
    /// the image's declared runtime metadata alongside the cached layers.
    pub async fn pull(
        &self,
        reference: &ImageReference,
    ) -> Result<(RuntimeConfig, Vec<CachedLayer>), ImageError> {
        tracing::info!(image = %reference, "pulling image");

        let manifest = self.registry.resolve_manifest(reference).await?;
        let runtime = self
            .registry
            .fetch_runtime_config(reference, &manifest.config)
            .await?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            let file = if self.cache.contains(&descriptor.digest).await {
                tracing::debug!(digest = %descriptor.digest, "layer already cached");
                self.cache.entry_path(&descriptor.digest)
            } else {
                tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "downloading layer");
                let data = self.registry.fetch_layer(reference, descriptor).await?;
                self.cache.put(&descriptor.digest, &data).await?
            };

            layers.push(CachedLayer {
                digest: descriptor.digest.clone(),
                file,
            });
        }

        Ok((runtime, layers))
    }

    /// Extracts the pulled layers into `dest` in manifest order, creating
    /// `dest` if it does not exist.
    pub async fn unpack(&self, layers: &[CachedLayer], dest: &Path) -> Result<(), ImageError> {
        fs::create_dir_all(dest).await?;

        for layer in layers {
            tracing::debug!(digest = %layer.digest, "extracting layer");
            let data = fs::read(&layer.file).await?;
            extract_layer(&data, dest)?;
        }

        Ok(())
    }

    /// Pull plus unpack in one step; the usual entry point for the drive
    /// assembly pipeline.
    pub async fn pull_into(
        &self,
        reference: &ImageReference,
        dest: &Path,
    ) -> Result<RuntimeConfig, ImageError> {
        let (runtime, layers) = self.pull(reference).await?;
        self.unpack(&layers, dest).await?;
        tracing::info!(image = %reference, layers = layers.len(), dest = %dest.display(), "image unpacked");
        Ok(runtime)
    }
}
