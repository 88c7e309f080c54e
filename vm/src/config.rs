use crate::RUN_CONFIG_FILE;
use crate::error::VmError;
use cinder_remote::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// The full runtime descriptor the init program reads at boot. Field names
/// are part of the on-disk contract with the init binary and must not
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(rename = "ImageConfig")]
    pub image_config: RuntimeConfig,
    #[serde(rename = "CmdOverride")]
    pub cmd_override: Option<Vec<String>>,
    #[serde(rename = "RootDevice")]
    pub root_device: String,
    #[serde(rename = "TTY")]
    pub tty: bool,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "ExtraEnv")]
    pub extra_env: Vec<String>,
    #[serde(rename = "Mounts")]
    pub mounts: Option<Vec<DriveMount>>,
    #[serde(rename = "EtcResolv")]
    pub etc_resolv: EtcResolv,
    #[serde(rename = "EtcHost")]
    pub etc_hosts: Option<Vec<HostEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveMount {
    #[serde(rename = "MountPath")]
    pub mount_path: String,
    #[serde(rename = "DevicePath")]
    pub device_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtcResolv {
    #[serde(rename = "Nameservers")]
    pub nameservers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Desc")]
    pub desc: String,
}

impl InitConfig {
    /// Synthesizes the boot configuration for an image with the fixed
    /// defaults: localhost hostname, Google resolvers, /dev/vdb root and a
    /// TERM variable for interactive shells.
    pub fn from_image(image_config: RuntimeConfig) -> Self {
        Self {
            image_config,
            cmd_override: None,
            root_device: "/dev/vdb".to_string(),
            tty: false,
            hostname: "localhost".to_string(),
            extra_env: vec!["TERM=xterm".to_string()],
            mounts: None,
            etc_resolv: EtcResolv {
                nameservers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            },
            etc_hosts: None,
        }
    }

    /// The command the init program will execute: a present, non-empty
    /// override fully replaces the image's command.
    pub fn boot_command(&self) -> Option<&[String]> {
        match &self.cmd_override {
            Some(cmd) if !cmd.is_empty() => Some(cmd),
            _ => self.image_config.cmd.as_deref(),
        }
    }

    /// Writes the config as `run.json` inside `dir`.
    pub async fn write_to(&self, dir: &Path) -> Result<(), VmError> {
        let path = dir.join(RUN_CONFIG_FILE);
        let body = serde_json::to_vec(self).map_err(|e| VmError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        fs::write(&path, body).await.map_err(|e| VmError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Reads a persisted config back from `path`.
    pub async fn read_from(path: &Path) -> Result<Self, VmError> {
        let body = fs::read(path).await.map_err(|e| VmError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_slice(&body).map_err(|e| VmError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> RuntimeConfig {
        RuntimeConfig {
            cmd: Some(vec!["/bin/sh".to_string()]),
            entrypoint: None,
            env: Some(vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            ]),
            working_dir: "/".to_string(),
            user: String::new(),
        }
    }

    #[test]
    fn synthesis_applies_fixed_defaults() {
        let cfg = InitConfig::from_image(sample_image());

        assert_eq!(cfg.hostname, "localhost");
        assert_eq!(cfg.root_device, "/dev/vdb");
        assert_eq!(cfg.extra_env, vec!["TERM=xterm"]);
        assert_eq!(cfg.etc_resolv.nameservers, vec!["8.8.8.8", "8.8.4.4"]);
        assert_eq!(cfg.cmd_override, None);
        assert!(!cfg.tty);
    }

    #[test]
    fn override_replaces_image_command_only_when_non_empty() {
        let mut cfg = InitConfig::from_image(sample_image());
        assert_eq!(cfg.boot_command(), Some(&["/bin/sh".to_string()][..]));

        cfg.cmd_override = Some(vec![]);
        assert_eq!(cfg.boot_command(), Some(&["/bin/sh".to_string()][..]));

        cfg.cmd_override = Some(vec!["/bin/bash".to_string()]);
        assert_eq!(cfg.boot_command(), Some(&["/bin/bash".to_string()][..]));
    }

    #[test]
    fn serialized_field_names_are_stable() {
        let cfg = InitConfig::from_image(sample_image());
        let value: serde_json::Value = serde_json::to_value(&cfg).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "ImageConfig",
            "CmdOverride",
            "RootDevice",
            "TTY",
            "Hostname",
            "ExtraEnv",
            "Mounts",
            "EtcResolv",
            "EtcHost",
        ] {
            assert!(object.contains_key(key), "missing field {key}");
        }

        assert!(value["ImageConfig"].as_object().unwrap().contains_key("Cmd"));
        assert!(
            value["EtcResolv"]
                .as_object()
                .unwrap()
                .contains_key("Nameservers")
        );
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let mut cfg = InitConfig::from_image(sample_image());
        cfg.cmd_override = Some(vec!["/bin/true".to_string()]);
        cfg.tty = true;
        cfg.mounts = Some(vec![DriveMount {
            mount_path: "/data".to_string(),
            device_path: "/dev/vdc".to_string(),
        }]);
        cfg.etc_hosts = Some(vec![HostEntry {
            host: "db".to_string(),
            ip: "10.0.0.2".to_string(),
            desc: "database".to_string(),
        }]);

        let json = serde_json::to_string(&cfg).unwrap();
        let back: InitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn round_trip_keeps_absent_and_empty_lists_distinct() {
        let mut absent = InitConfig::from_image(sample_image());
        absent.mounts = None;
        absent.etc_hosts = None;

        let mut empty = absent.clone();
        empty.mounts = Some(vec![]);
        empty.etc_hosts = Some(vec![]);

        let absent_back: InitConfig =
            serde_json::from_str(&serde_json::to_string(&absent).unwrap()).unwrap();
        let empty_back: InitConfig =
            serde_json::from_str(&serde_json::to_string(&empty).unwrap()).unwrap();

        assert_eq!(absent_back.mounts, None);
        assert_eq!(empty_back.mounts, Some(vec![]));
        assert_eq!(absent_back.etc_hosts, None);
        assert_eq!(empty_back.etc_hosts, Some(vec![]));
        assert_ne!(absent_back, empty_back);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = InitConfig::from_image(sample_image());

        cfg.write_to(dir.path()).await.unwrap();
        let back = InitConfig::read_from(&dir.path().join(RUN_CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(cfg, back);
    }

    #[tokio::test]
    async fn read_from_missing_file_is_a_config_error() {
        let err = InitConfig::read_from(Path::new("/no/such/run.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::ConfigIo { .. }));
    }
}
