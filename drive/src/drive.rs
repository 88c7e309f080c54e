use crate::error::DriveError;
use crate::size::parse_size;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Fully enumerated options for creating a loop drive. A `DriveSpec` is
/// validated once by [`Drive::create`]; there is no partially-initialized
/// intermediate state.
#[derive(Debug, Clone)]
pub struct DriveSpec {
    /// Backing file for the loop device.
    pub file: PathBuf,
    /// Filesystem to format the drive with, e.g. "ext4" or "ext2".
    pub fstype: String,
    /// Human-readable size, e.g. "400M".
    pub size: String,
}

/// A loop-backed block device. The backing file persists across
/// mount/unmount cycles; only the mount point is transient.
#[derive(Debug, Clone)]
pub struct Drive {
    file: PathBuf,
    fstype: String,
}

impl Drive {
    /// Allocates the backing file at exactly the requested size and formats
    /// it with the filesystem-specific `mkfs.<fstype>` tool.
    pub async fn create(spec: &DriveSpec) -> Result<Self, DriveError> {
        let bytes = parse_size(&spec.size)?;

        allocate(&spec.file, bytes).await?;
        tracing::debug!(file = %spec.file.display(), bytes, "allocated backing file");

        format_drive(&spec.file, &spec.fstype).await?;
        tracing::info!(file = %spec.file.display(), fstype = %spec.fstype, "loop drive created");

        Ok(Self {
            file: spec.file.clone(),
            fstype: spec.fstype.clone(),
        })
    }

    /// Reopens an existing backing file without touching its contents.
    pub fn open(file: impl Into<PathBuf>, fstype: &str) -> Self {
        Self {
            file: file.into(),
            fstype: fstype.to_string(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn fstype(&self) -> &str {
        &self.fstype
    }

    /// Loop-mounts the drive at `target`. The target must be an existing
    /// directory.
    pub async fn mount(&self, target: &Path) -> Result<(), DriveError> {
        validate_target(target).map_err(DriveError::MountFailure)?;

        let mount = resolve_tool("mount")?;
        let output = Command::new(&mount)
            .args(mount_args(&self.file, target))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(DriveError::MountFailure(format!(
                "mount {} at {} exited with {}: {}",
                self.file.display(),
                target.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(file = %self.file.display(), target = %target.display(), "mounted loop drive");
        Ok(())
    }

    /// Unmounts the drive from `target`. Must be called for every
    /// successful mount, on every exit path.
    pub async fn unmount(&self, target: &Path) -> Result<(), DriveError> {
        validate_target(target).map_err(DriveError::UnmountFailure)?;

        let umount = resolve_tool("umount")?;
        let output = Command::new(&umount)
            .arg(target)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(DriveError::UnmountFailure(format!(
                "umount {} exited with {}: {}",
                target.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(target = %target.display(), "unmounted loop drive");
        Ok(())
    }
}

/// Creates `file` with a length of exactly `size` bytes.
pub async fn allocate(file: &Path, size: u64) -> Result<(), DriveError> {
    let handle = tokio::fs::File::create(file).await?;
    handle.set_len(size).await?;
    handle.sync_all().await?;
    Ok(())
}

async fn format_drive(file: &Path, fstype: &str) -> Result<(), DriveError> {
    let tool = format!("mkfs.{}", fstype);
    let mkfs = resolve_tool(&tool)?;

    // Null stdin keeps mke2fs from prompting about formatting a regular file.
    let output = Command::new(&mkfs)
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(DriveError::ExternalToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

fn resolve_tool(name: &str) -> Result<PathBuf, DriveError> {
    which::which(name).map_err(|_| DriveError::ToolMissing(name.to_string()))
}

fn validate_target(target: &Path) -> Result<(), String> {
    if target.as_os_str().is_empty() {
        return Err("target must not be empty".to_string());
    }
    if !target.is_dir() {
        return Err(format!("target {} is not a directory", target.display()));
    }
    Ok(())
}

fn mount_args(file: &Path, target: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "-o".into(),
        "loop,noatime".into(),
        file.as_os_str().to_os_string(),
        target.as_os_str().to_os_string(),
    ]
}
