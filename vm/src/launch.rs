use crate::MARKER_DIR;
use crate::error::VmError;
use std::path::PathBuf;
use tokio::process::Command;

const CNI_NETWORK: &str = "fcnet";

const BASE_KERNEL_OPTS: &[&str] = &[
    "ro",
    "console=ttyS0",
    "noapic",
    "reboot=k",
    "panic=1",
    "pci=off",
    "nomodules",
];

/// Everything the hypervisor launcher needs to boot a microVM. Built from
/// a prepared microVM directory; immutable once constructed.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Path to the launcher binary.
    pub binary: PathBuf,
    /// Kernel image handed to the hypervisor.
    pub kernel: PathBuf,
    /// Kernel command line, joined with spaces.
    pub kernel_opts: Vec<String>,
    /// Drive the guest boots from.
    pub root_drive: PathBuf,
    /// Further drives attached after the root drive, in order.
    pub extra_drives: Vec<PathBuf>,
    /// CNI network the guest joins.
    pub cni_network: String,
}

impl LaunchSpec {
    pub fn new(
        binary: PathBuf,
        kernel: PathBuf,
        root_drive: PathBuf,
        extra_drives: Vec<PathBuf>,
    ) -> Self {
        let mut kernel_opts: Vec<String> =
            BASE_KERNEL_OPTS.iter().map(|s| s.to_string()).collect();
        kernel_opts.push(format!("init=/{}/init", MARKER_DIR));

        Self {
            binary,
            kernel,
            kernel_opts,
            root_drive,
            extra_drives,
            cni_network: CNI_NETWORK.to_string(),
        }
    }

    /// The launcher's argument vector, excluding the binary itself.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--kernel={}", self.kernel.display()),
            format!("--cni-net={}", self.cni_network),
            format!("--root-drive={}:rw", self.root_drive.display()),
        ];
        for drive in &self.extra_drives {
            args.push(format!("--add-drive={}:rw", drive.display()));
        }
        args.push(format!("--kernel-opts={}", self.kernel_opts.join(" ")));
        args
    }
}

/// Runs the launcher in the foreground with inherited stdio and waits for
/// the guest to exit.
pub async fn launch(spec: &LaunchSpec) -> Result<(), VmError> {
    tracing::info!(
        binary = %spec.binary.display(),
        kernel = %spec.kernel.display(),
        "launching microvm"
    );

    let status = Command::new(&spec.binary).args(spec.args()).status().await?;

    if !status.success() {
        return Err(VmError::LaunchFailed(format!(
            "{} exited with {}",
            spec.binary.display(),
            status
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_the_launcher_contract() {
        let spec = LaunchSpec::new(
            PathBuf::from("/opt/cinder/assets/firectl"),
            PathBuf::from("/opt/cinder/microvms/demo/vmlinux"),
            PathBuf::from("/opt/cinder/microvms/demo/tmpinit"),
            vec![PathBuf::from("/opt/cinder/microvms/demo/rootfs.ext4")],
        );

        assert_eq!(
            spec.args(),
            vec![
                "--kernel=/opt/cinder/microvms/demo/vmlinux".to_string(),
                "--cni-net=fcnet".to_string(),
                "--root-drive=/opt/cinder/microvms/demo/tmpinit:rw".to_string(),
                "--add-drive=/opt/cinder/microvms/demo/rootfs.ext4:rw".to_string(),
                "--kernel-opts=ro console=ttyS0 noapic reboot=k panic=1 pci=off nomodules init=/cinder/init"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn kernel_opts_end_with_the_init_path() {
        let spec = LaunchSpec::new(
            PathBuf::from("firectl"),
            PathBuf::from("vmlinux"),
            PathBuf::from("tmpinit"),
            Vec::new(),
        );
        assert_eq!(spec.kernel_opts.last().unwrap(), "init=/cinder/init");
        assert_eq!(spec.cni_network, "fcnet");
        assert!(spec.extra_drives.is_empty());
    }

    #[tokio::test]
    async fn failing_launcher_surfaces_its_exit() {
        let spec = LaunchSpec::new(
            PathBuf::from("/bin/false"),
            PathBuf::from("vmlinux"),
            PathBuf::from("tmpinit"),
            Vec::new(),
        );
        let err = launch(&spec).await.unwrap_err();
        assert!(matches!(err, VmError::LaunchFailed(_)));
    }
}
