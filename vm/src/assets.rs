use crate::error::VmError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const INIT_ASSET: &str = "init";
pub const KERNEL_ASSET: &str = "vmlinux";
pub const LAUNCHER_ASSET: &str = "firectl";

const RELEASE_OWNER: &str = "thi-startup";
const RELEASE_PATTERN: &str = "amd64.tar.gz";

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// The shared asset cache holding the init binary, the kernel image and the
/// hypervisor launcher. The binaries are fetched from release archives; the
/// kernel has to be provided by the operator.
pub struct AssetStore {
    dir: PathBuf,
    http: reqwest::Client,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, VmError> {
        let http = reqwest::Client::builder()
            .user_agent("cinder/0.1")
            .build()?;

        Ok(Self {
            dir: dir.into(),
            http,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn init_path(&self) -> PathBuf {
        self.dir.join(INIT_ASSET)
    }

    pub fn kernel_path(&self) -> PathBuf {
        self.dir.join(KERNEL_ASSET)
    }

    pub fn launcher_path(&self) -> PathBuf {
        self.dir.join(LAUNCHER_ASSET)
    }

    /// Downloads any missing downloadable asset and verifies the kernel is
    /// in place. The kernel image cannot be fetched automatically.
    pub async fn ensure_ready(&self) -> Result<(), VmError> {
        fs::create_dir_all(&self.dir).await?;

        for (path, repo) in [
            (self.init_path(), INIT_ASSET),
            (self.launcher_path(), LAUNCHER_ASSET),
        ] {
            if fs::try_exists(&path).await? {
                tracing::info!(asset = repo, "asset already present");
                continue;
            }
            tracing::info!(asset = repo, "asset missing, downloading release");
            self.download_release(repo).await?;
        }

        if !fs::try_exists(self.kernel_path()).await? {
            return Err(VmError::MissingAsset(format!(
                "no kernel image; copy a vmlinux into {}",
                self.dir.display()
            )));
        }

        Ok(())
    }

    /// Copies the cached init binary into `dir`, preserving its content and
    /// execute bit.
    pub async fn copy_init_into(&self, dir: &Path) -> Result<(), VmError> {
        let src = self.init_path();
        if !fs::try_exists(&src).await? {
            return Err(VmError::MissingAsset(format!(
                "init binary not present at {}; run `cinder init` first",
                src.display()
            )));
        }

        let dst = dir.join(INIT_ASSET);
        fs::copy(&src, &dst).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dst, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(())
    }

    /// Fetches the latest release of `repo`, picks the linux/amd64 archive
    /// and unpacks it into the assets dir.
    async fn download_release(&self, repo: &str) -> Result<(), VmError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/releases/latest",
            RELEASE_OWNER, repo
        );

        let release: Release = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let asset = release
            .assets
            .iter()
            .find(|a| a.name.contains(RELEASE_PATTERN))
            .ok_or_else(|| {
                VmError::AssetNotFound(format!("{}/{} {}", RELEASE_OWNER, repo, RELEASE_PATTERN))
            })?;

        tracing::info!(asset = %asset.name, "downloading release asset");
        let archive = self
            .http
            .get(&asset.browser_download_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        unpack_archive(&archive, &self.dir)?;
        Ok(())
    }
}

fn unpack_archive(archive: &[u8], dest: &Path) -> Result<(), VmError> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)?;
    Ok(())
}
