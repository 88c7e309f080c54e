mod assets;
mod config;
mod context;
mod create;
mod error;
mod launch;
mod run;

pub use assets::AssetStore;
pub use config::{DriveMount, EtcResolv, HostEntry, InitConfig};
pub use context::CacheContext;
pub use create::{CreateOpts, create_microvm};
pub use error::VmError;
pub use launch::{LaunchSpec, launch};
pub use run::{RunOpts, run_microvm};

/// Backing file of the rootfs drive inside a microVM directory.
pub const ROOTFS_DRIVE_FILE: &str = "rootfs.ext4";
/// Backing file of the init drive inside a microVM directory.
pub const INIT_DRIVE_FILE: &str = "tmpinit";
/// Kernel image symlink inside a microVM directory.
pub const KERNEL_FILE: &str = "vmlinux";
/// Persisted init configuration, both the microVM sidecar and the copy
/// written into the init drive's marker directory.
pub const RUN_CONFIG_FILE: &str = "run.json";
/// Marker subdirectory inside the init drive. Its presence means the drive
/// is pristine; a boot consumes it.
pub const MARKER_DIR: &str = "cinder";
