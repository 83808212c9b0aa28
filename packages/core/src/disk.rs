//! Block device inspection using lsblk.
//!
//! Resolves the device token a user typed (`sdb1`, `/dev/sdb1`,
//! `/dev/disk/by-uuid/...`) to a canonical block device path and reads the
//! identity needed to write a stable mount table entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::stat::{SFlag, stat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::preset::FilesystemKind;

/// Identity of a block device as needed for provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Canonical device path (e.g., "/dev/sdb1").
    pub path: PathBuf,
    /// Filesystem UUID (case-sensitive, as returned by blkid).
    pub volume_id: String,
    /// Filesystem kind reported by the device.
    pub kind: FilesystemKind,
    /// Current mount point, if mounted.
    pub mountpoint: Option<PathBuf>,
    /// Volume label, if set.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

impl DeviceIdentity {
    /// Returns true if this device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }
}

/// Resolves and inspects block devices.
pub trait DeviceInspector {
    /// Normalizes a device token to a canonical block device path.
    fn resolve(&self, token: &str) -> Result<PathBuf>;

    /// Reads the identity of a resolved device.
    fn inspect(&self, device: &Path) -> Result<DeviceIdentity>;
}

/// [`DeviceInspector`] backed by the filesystem and `lsblk`.
#[derive(Debug, Clone, Default)]
pub struct LsblkInspector;

impl DeviceInspector for LsblkInspector {
    fn resolve(&self, token: &str) -> Result<PathBuf> {
        let candidate = device_candidate(token)?;

        let canonical = match fs::canonicalize(&candidate) {
            Ok(path) => path,
            Err(_) => return Err(Error::NotABlockDevice { path: candidate }),
        };

        let is_block = stat(&canonical)
            .map(|st| SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT == SFlag::S_IFBLK)
            .unwrap_or(false);
        if !is_block {
            return Err(Error::NotABlockDevice { path: canonical });
        }

        debug!(token, device = %canonical.display(), "resolved device");
        Ok(canonical)
    }

    fn inspect(&self, device: &Path) -> Result<DeviceIdentity> {
        let device_arg = device.display().to_string();
        let output = Command::new("lsblk")
            .args([
                "--json",
                "--bytes",
                "--nodeps",
                "--output",
                "NAME,PATH,UUID,FSTYPE,LABEL,MOUNTPOINT,SIZE",
                &device_arg,
            ])
            .output()
            .command_context("lsblk")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::CommandExit {
                command: "lsblk".to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_identity(device, &stdout)
    }
}

/// Turns a bare name into a `/dev` path; absolute paths pass through.
fn device_candidate(token: &str) -> Result<PathBuf> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::invalid("device", "must not be empty"));
    }
    if token.starts_with('/') {
        Ok(PathBuf::from(token))
    } else if token.contains('/') {
        Err(Error::invalid(
            "device",
            format!("'{}' is neither a device name nor an absolute path", token),
        ))
    } else {
        Ok(Path::new("/dev").join(token))
    }
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// Builds a [`DeviceIdentity`] from `lsblk --json` output for `device`.
fn parse_identity(device: &Path, json: &str) -> Result<DeviceIdentity> {
    let output: LsblkOutput = serde_json::from_str(json).map_err(|e| Error::LsblkParse {
        message: e.to_string(),
    })?;

    let dev = output
        .blockdevices
        .into_iter()
        .next()
        .ok_or_else(|| Error::LsblkParse {
            message: format!("no entry for {}", device.display()),
        })?;

    let volume_id = non_empty(dev.uuid).ok_or_else(|| Error::IdentityUnavailable {
        device: device.to_path_buf(),
        what: "volume UUID".to_string(),
    })?;
    let fstype = non_empty(dev.fstype).ok_or_else(|| Error::IdentityUnavailable {
        device: device.to_path_buf(),
        what: "filesystem type".to_string(),
    })?;

    Ok(DeviceIdentity {
        path: dev
            .path
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new("/dev").join(&dev.name)),
        volume_id,
        kind: FilesystemKind::parse(&fstype),
        mountpoint: non_empty(dev.mountpoint).map(PathBuf::from),
        label: non_empty(dev.label),
        size: dev.size.unwrap_or(0),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LSBLK_JSON: &str = r#"{
        "blockdevices": [
            {
                "name": "sdb1",
                "path": "/dev/sdb1",
                "uuid": "ABCD-1234",
                "fstype": "exfat",
                "label": "PORTABLE",
                "mountpoint": "/media/usb",
                "size": 128849018880
            }
        ]
    }"#;

    #[test]
    fn test_parse_identity() {
        let identity = parse_identity(Path::new("/dev/sdb1"), SAMPLE_LSBLK_JSON).unwrap();

        assert_eq!(identity.path, PathBuf::from("/dev/sdb1"));
        assert_eq!(identity.volume_id, "ABCD-1234");
        assert_eq!(identity.kind, FilesystemKind::Exfat);
        assert_eq!(identity.label.as_deref(), Some("PORTABLE"));
        assert_eq!(identity.mountpoint, Some(PathBuf::from("/media/usb")));
        assert!(identity.is_mounted());
        assert_eq!(identity.size, 128849018880);
    }

    #[test]
    fn test_parse_identity_unmounted_ext4() {
        let json = r#"{"blockdevices": [{"name": "nvme0n1p3", "uuid": "0b5c-77", "fstype": "ext4",
            "label": null, "mountpoint": null, "size": 1024}]}"#;
        let identity = parse_identity(Path::new("/dev/nvme0n1p3"), json).unwrap();

        assert_eq!(identity.path, PathBuf::from("/dev/nvme0n1p3"));
        assert_eq!(identity.kind, FilesystemKind::Ext4);
        assert!(!identity.is_mounted());
        assert_eq!(identity.label, None);
    }

    #[test]
    fn test_missing_uuid_is_identity_unavailable() {
        let json = r#"{"blockdevices": [{"name": "sdc", "uuid": null, "fstype": "ext4"}]}"#;
        let err = parse_identity(Path::new("/dev/sdc"), json).unwrap_err();
        assert!(matches!(err, Error::IdentityUnavailable { ref what, .. } if what == "volume UUID"));
    }

    #[test]
    fn test_missing_fstype_is_identity_unavailable() {
        let json = r#"{"blockdevices": [{"name": "sdc", "uuid": "X-1", "fstype": ""}]}"#;
        let err = parse_identity(Path::new("/dev/sdc"), json).unwrap_err();
        assert!(matches!(err, Error::IdentityUnavailable { .. }));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            parse_identity(Path::new("/dev/sdc"), "not json"),
            Err(Error::LsblkParse { .. })
        ));
        assert!(matches!(
            parse_identity(Path::new("/dev/sdc"), r#"{"blockdevices": []}"#),
            Err(Error::LsblkParse { .. })
        ));
    }

    #[test]
    fn test_device_candidate() {
        assert_eq!(device_candidate("sdb1").unwrap(), PathBuf::from("/dev/sdb1"));
        assert_eq!(
            device_candidate(" /dev/sdb1 ").unwrap(),
            PathBuf::from("/dev/sdb1")
        );
        assert!(device_candidate("").is_err());
        assert!(device_candidate("dev/sdb1").is_err());
    }

    #[test]
    fn test_resolve_rejects_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let token = file.path().display().to_string();
        let err = LsblkInspector.resolve(&token).unwrap_err();
        assert!(matches!(err, Error::NotABlockDevice { .. }));
    }

    #[test]
    fn test_resolve_rejects_missing_device() {
        let err = LsblkInspector
            .resolve("definitely-not-a-device-xyz")
            .unwrap_err();
        assert!(matches!(err, Error::NotABlockDevice { .. }));
    }
}
