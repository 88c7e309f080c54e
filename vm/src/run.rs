use crate::assets::AssetStore;
use crate::config::InitConfig;
use crate::context::CacheContext;
use crate::error::{VmError, resolve_unmount};
use crate::launch::{LaunchSpec, launch};
use crate::{INIT_DRIVE_FILE, KERNEL_FILE, MARKER_DIR, ROOTFS_DRIVE_FILE, RUN_CONFIG_FILE};
use cinder_drive::Drive;
use std::path::Path;
use tokio::fs;

// Guest-created directories wiped during reclaim.
const STALE_DIRS: &[&str] = &["newroot", "dev"];

#[derive(Debug, Clone)]
pub struct RunOpts {
    /// Name of an existing microVM.
    pub name: String,
    /// Command run inside the guest instead of the image's command. Applies
    /// to this run only; the persisted config is untouched.
    pub exec: Option<String>,
}

/// Boots an existing microVM: refreshes the init drive, then hands the
/// machine to the hypervisor launcher and waits for it to exit.
pub async fn run_microvm(
    ctx: &CacheContext,
    assets: &AssetStore,
    opts: &RunOpts,
) -> Result<(), VmError> {
    let spec = prepare_launch(ctx, assets, opts)
        .await
        .map_err(|e| e.in_stage("preparing init drive"))?;
    launch(&spec).await
}

/// Validates the microVM, refreshes its init drive through a scratch mount
/// and assembles the launcher invocation.
async fn prepare_launch(
    ctx: &CacheContext,
    assets: &AssetStore,
    opts: &RunOpts,
) -> Result<LaunchSpec, VmError> {
    let dir = ctx.microvm_dir(&opts.name);
    if !fs::try_exists(&dir).await? {
        return Err(VmError::NotFound(opts.name.clone()));
    }

    let init_file = dir.join(INIT_DRIVE_FILE);
    if !fs::try_exists(&init_file).await? {
        return Err(VmError::MissingInitDrive(opts.name.clone()));
    }

    let mut config = InitConfig::read_from(&dir.join(RUN_CONFIG_FILE)).await?;
    apply_exec_override(&mut config, opts.exec.as_deref());

    let drive = Drive::open(&init_file, "ext2");
    let scratch = tempfile::tempdir()?;
    drive.mount(scratch.path()).await?;

    let work = refresh_init_drive(scratch.path(), assets, &config).await;
    let unmount = drive.unmount(scratch.path()).await;
    resolve_unmount(work, unmount)?;

    Ok(LaunchSpec::new(
        assets.launcher_path(),
        dir.join(KERNEL_FILE),
        init_file,
        vec![dir.join(ROOTFS_DRIVE_FILE)],
    ))
}

/// Applies a one-shot command override. An absent or empty exec leaves the
/// persisted override untouched.
fn apply_exec_override(config: &mut InitConfig, exec: Option<&str>) {
    if let Some(exec) = exec
        && !exec.is_empty()
    {
        config.cmd_override = Some(vec![exec.to_string()]);
    }
}

/// Brings a mounted init drive back to its boot-ready state. A drive whose
/// marker directory is gone was consumed by a previous boot and is
/// reclaimed first; the current config is then written into the marker.
async fn refresh_init_drive(
    mount: &Path,
    assets: &AssetStore,
    config: &InitConfig,
) -> Result<(), VmError> {
    let marker = mount.join(MARKER_DIR);

    if !fs::try_exists(&marker).await? {
        tracing::info!(mount = %mount.display(), "init drive consumed, reclaiming");
        reclaim(mount, assets).await?;
    }

    config.write_to(&marker).await
}

/// Deletes the directories the guest's pivot left behind, then restores the
/// marker directory and the init binary.
async fn reclaim(mount: &Path, assets: &AssetStore) -> Result<(), VmError> {
    for stale in STALE_DIRS {
        let path = mount.join(stale);
        if fs::try_exists(&path).await? {
            tracing::debug!(dir = %path.display(), "removing stale guest directory");
            fs::remove_dir_all(&path).await?;
        }
    }

    let marker = mount.join(MARKER_DIR);
    fs::create_dir(&marker).await?;
    assets.copy_init_into(&marker).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_remote::RuntimeConfig;

    fn fake_assets(dir: &Path) -> AssetStore {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("init"), b"fake init\n").unwrap();
        AssetStore::new(dir).unwrap()
    }

    fn sample_config() -> InitConfig {
        InitConfig::from_image(RuntimeConfig {
            cmd: Some(vec!["/bin/sh".to_string()]),
            ..RuntimeConfig::default()
        })
    }

    #[test]
    fn empty_exec_does_not_override_the_command() {
        let mut config = sample_config();
        apply_exec_override(&mut config, Some(""));
        assert_eq!(config.cmd_override, None);
        assert_eq!(config.boot_command(), Some(&["/bin/sh".to_string()][..]));

        apply_exec_override(&mut config, None);
        assert_eq!(config.cmd_override, None);

        apply_exec_override(&mut config, Some("/bin/bash"));
        assert_eq!(config.cmd_override, Some(vec!["/bin/bash".to_string()]));
    }

    #[tokio::test]
    async fn unknown_microvm_is_not_found() {
        let base = tempfile::tempdir().unwrap();
        let ctx = CacheContext::new(base.path());
        let assets = fake_assets(&ctx.assets_dir());

        let opts = RunOpts {
            name: "ghost".to_string(),
            exec: None,
        };
        let err = run_microvm(&ctx, &assets, &opts).await.unwrap_err();
        assert!(err.to_string().contains("microvm not found"));
    }

    #[tokio::test]
    async fn microvm_without_init_drive_is_refused() {
        let base = tempfile::tempdir().unwrap();
        let ctx = CacheContext::new(base.path());
        let assets = fake_assets(&ctx.assets_dir());

        std::fs::create_dir_all(ctx.microvm_dir("demo")).unwrap();

        let opts = RunOpts {
            name: "demo".to_string(),
            exec: None,
        };
        let err = run_microvm(&ctx, &assets, &opts).await.unwrap_err();
        assert!(err.to_string().contains("no init drive"));
    }

    #[tokio::test]
    async fn reclaim_runs_only_when_marker_absent() {
        let assets_dir = tempfile::tempdir().unwrap();
        let assets = fake_assets(assets_dir.path());
        let config = sample_config();

        // Marker present: the guest directories are left alone.
        let intact = tempfile::tempdir().unwrap();
        std::fs::create_dir(intact.path().join(MARKER_DIR)).unwrap();
        std::fs::create_dir(intact.path().join("newroot")).unwrap();

        refresh_init_drive(intact.path(), &assets, &config)
            .await
            .unwrap();
        assert!(intact.path().join("newroot").is_dir());

        // Marker absent: the drive is reclaimed.
        let consumed = tempfile::tempdir().unwrap();
        std::fs::create_dir(consumed.path().join("newroot")).unwrap();
        std::fs::create_dir(consumed.path().join("dev")).unwrap();

        refresh_init_drive(consumed.path(), &assets, &config)
            .await
            .unwrap();
        assert!(!consumed.path().join("newroot").exists());
        assert!(!consumed.path().join("dev").exists());
        assert!(consumed.path().join(MARKER_DIR).is_dir());
    }

    #[tokio::test]
    async fn reclaim_restores_init_binary_and_config() {
        let assets_dir = tempfile::tempdir().unwrap();
        let assets = fake_assets(assets_dir.path());
        let config = sample_config();

        let mount = tempfile::tempdir().unwrap();
        refresh_init_drive(mount.path(), &assets, &config)
            .await
            .unwrap();

        let marker = mount.path().join(MARKER_DIR);
        assert_eq!(std::fs::read(marker.join("init")).unwrap(), b"fake init\n");

        let back = InitConfig::read_from(&marker.join(RUN_CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(back, config);
    }

    #[tokio::test]
    async fn refresh_writes_the_current_config_over_the_old_one() {
        let assets_dir = tempfile::tempdir().unwrap();
        let assets = fake_assets(assets_dir.path());

        let mount = tempfile::tempdir().unwrap();
        let marker = mount.path().join(MARKER_DIR);
        std::fs::create_dir(&marker).unwrap();
        std::fs::write(marker.join(RUN_CONFIG_FILE), b"{}").unwrap();

        let mut config = sample_config();
        config.cmd_override = Some(vec!["/bin/bash".to_string()]);

        refresh_init_drive(mount.path(), &assets, &config)
            .await
            .unwrap();

        let back = InitConfig::read_from(&marker.join(RUN_CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(back.cmd_override, Some(vec!["/bin/bash".to_string()]));
    }
}
