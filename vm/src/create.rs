use crate::assets::AssetStore;
use crate::config::InitConfig;
use crate::context::CacheContext;
use crate::error::{VmError, resolve_unmount};
use crate::{INIT_DRIVE_FILE, KERNEL_FILE, MARKER_DIR, ROOTFS_DRIVE_FILE};
use cinder_drive::{Drive, DriveSpec};
use cinder_image::Fetcher;
use cinder_remote::{ImageReference, RuntimeConfig};
use std::path::{Path, PathBuf};
use tokio::fs;

const DEFAULT_FSTYPE: &str = "ext4";
const DEFAULT_SIZE: &str = "400M";

const INIT_DRIVE_FSTYPE: &str = "ext2";
const INIT_DRIVE_SIZE: &str = "40M";

/// Fully enumerated options for building a microVM.
#[derive(Debug, Clone)]
pub struct CreateOpts {
    /// MicroVM name; becomes the directory name under `microvms/`.
    pub name: String,
    /// Container image reference the rootfs is built from.
    pub image: String,
    /// File name of the rootfs drive inside the microVM directory.
    pub drive_name: String,
    /// Filesystem type of the rootfs drive.
    pub fstype: String,
    /// Rootfs drive size, e.g. "400M".
    pub size: String,
    /// Also build the init drive.
    pub init: bool,
}

impl CreateOpts {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            drive_name: ROOTFS_DRIVE_FILE.to_string(),
            fstype: DEFAULT_FSTYPE.to_string(),
            size: DEFAULT_SIZE.to_string(),
            init: false,
        }
    }
}

/// Builds a new microVM directory: rootfs drive from the image, optional
/// init drive, persisted config sidecar and kernel symlink.
///
/// A failed step aborts the rest; the partially-built directory is left on
/// disk for inspection.
pub async fn create_microvm(
    ctx: &CacheContext,
    assets: &AssetStore,
    fetcher: &Fetcher,
    opts: &CreateOpts,
) -> Result<PathBuf, VmError> {
    let reference = ImageReference::parse(&opts.image)?;
    let dir = allocate_microvm_dir(ctx, &opts.name).await?;

    tracing::info!(microvm = %opts.name, image = %opts.image, "creating microvm");

    let runtime = build_rootfs_drive(&dir, fetcher, &reference, opts)
        .await
        .map_err(|e| e.in_stage("building rootfs drive"))?;

    let config = InitConfig::from_image(runtime);

    if opts.init {
        build_init_drive(&dir, assets, &config)
            .await
            .map_err(|e| e.in_stage("building init drive"))?;
    }

    config
        .write_to(&dir)
        .await
        .map_err(|e| e.in_stage("persisting config sidecar"))?;

    link_kernel(&dir, assets)
        .await
        .map_err(|e| e.in_stage("linking kernel image"))?;

    tracing::info!(microvm = %opts.name, dir = %dir.display(), "microvm created");
    Ok(dir)
}

/// Claims the microVM directory. An existing directory is never
/// overwritten.
async fn allocate_microvm_dir(ctx: &CacheContext, name: &str) -> Result<PathBuf, VmError> {
    fs::create_dir_all(ctx.microvms_dir()).await?;

    let dir = ctx.microvm_dir(name);
    match fs::create_dir(&dir).await {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(VmError::AlreadyExists(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates and formats the rootfs drive, then unpacks the image into it
/// through a scratch mount. The unmount runs on every exit path.
async fn build_rootfs_drive(
    dir: &Path,
    fetcher: &Fetcher,
    reference: &ImageReference,
    opts: &CreateOpts,
) -> Result<RuntimeConfig, VmError> {
    let drive = Drive::create(&DriveSpec {
        file: dir.join(&opts.drive_name),
        fstype: opts.fstype.clone(),
        size: opts.size.clone(),
    })
    .await?;

    let scratch = tempfile::tempdir()?;
    drive.mount(scratch.path()).await?;

    let work = fetcher
        .pull_into(reference, scratch.path())
        .await
        .map_err(VmError::from);
    let unmount = drive.unmount(scratch.path()).await;

    resolve_unmount(work, unmount)
}

/// Creates the fixed-size init drive and flashes the init binary plus the
/// serialized config into its marker directory.
async fn build_init_drive(
    dir: &Path,
    assets: &AssetStore,
    config: &InitConfig,
) -> Result<(), VmError> {
    let drive = Drive::create(&DriveSpec {
        file: dir.join(INIT_DRIVE_FILE),
        fstype: INIT_DRIVE_FSTYPE.to_string(),
        size: INIT_DRIVE_SIZE.to_string(),
    })
    .await?;

    let scratch = tempfile::tempdir()?;
    drive.mount(scratch.path()).await?;

    let work = flash_init(scratch.path(), assets, config).await;
    let unmount = drive.unmount(scratch.path()).await;

    resolve_unmount(work, unmount)
}

async fn flash_init(mount: &Path, assets: &AssetStore, config: &InitConfig) -> Result<(), VmError> {
    let marker = mount.join(MARKER_DIR);
    fs::create_dir(&marker).await?;

    assets.copy_init_into(&marker).await?;
    config.write_to(&marker).await?;

    Ok(())
}

async fn link_kernel(dir: &Path, assets: &AssetStore) -> Result<(), VmError> {
    fs::symlink(assets.kernel_path(), dir.join(KERNEL_FILE)).await?;
    Ok(())
}
