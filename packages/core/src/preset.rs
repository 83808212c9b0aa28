//! Mount option policy per filesystem kind.
//!
//! Filesystems without POSIX ownership (FAT, exFAT, NTFS) need the owning
//! user and group passed as mount options. POSIX filesystems (ext4, xfs,
//! btrfs, ...) reject those options at mount time, so they only ever get the
//! base options. [`MountOptionPolicy`] is consulted both when composing a new
//! mount table entry and when checking an existing one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Options applied to every mount regardless of filesystem.
pub const BASE_OPTIONS: &[&str] = &["defaults", "nofail"];

/// Permission mask applied to ownership filesystems.
pub const OWNERSHIP_UMASK: &str = "0002";

/// Option keys that only make sense on filesystems without POSIX ownership.
const OWNERSHIP_OPTION_KEYS: &[&str] = &["uid", "gid", "umask", "fmask", "dmask"];

/// Filesystem kind as reported by the device or recorded in the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    Ext4,
    Xfs,
    Btrfs,
    Vfat,
    Exfat,
    Ntfs,
    Other(String),
}

impl FilesystemKind {
    /// Parses a filesystem name (as printed by lsblk or found in fstab).
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            "vfat" | "fat" | "fat32" => Self::Vfat,
            "exfat" => Self::Exfat,
            "ntfs" | "ntfs3" => Self::Ntfs,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Type token written to the mount table.
    pub fn table_name(&self) -> &str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Vfat => "vfat",
            Self::Exfat => "exfat",
            // In-kernel driver
            Self::Ntfs => "ntfs3",
            Self::Other(name) => name,
        }
    }

    /// Returns true if ownership must be supplied through mount options.
    pub fn needs_ownership_options(&self) -> bool {
        matches!(self, Self::Vfat | Self::Exfat | Self::Ntfs)
    }

    /// Returns true if the filesystem rejects `uid=`/`gid=` style options.
    ///
    /// Unrecognized kinds are treated as POSIX filesystems.
    pub fn forbids_ownership_options(&self) -> bool {
        !self.needs_ownership_options()
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Numeric owner of a mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Maps a filesystem kind to its valid mount options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptionPolicy {
    /// Extra options appended after the generated ones.
    pub extra_options: Vec<String>,
}

impl MountOptionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that appends `extra` to every generated option set.
    pub fn with_extra_options(extra: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extra_options: extra.into_iter().map(Into::into).collect(),
        }
    }

    /// Generates the ordered option list for a filesystem kind.
    pub fn options_for(&self, kind: &FilesystemKind, owner: Ownership) -> Vec<String> {
        let mut opts: Vec<String> = BASE_OPTIONS.iter().map(|s| s.to_string()).collect();

        if kind.needs_ownership_options() {
            opts.push(format!("uid={}", owner.uid));
            opts.push(format!("gid={}", owner.gid));
            opts.push(format!("umask={}", OWNERSHIP_UMASK));
        }

        for extra in &self.extra_options {
            let extra = extra.trim();
            if extra.is_empty() || opts.iter().any(|o| o == extra) {
                continue;
            }
            if kind.forbids_ownership_options() && is_ownership_option(extra) {
                continue;
            }
            opts.push(extra.to_string());
        }

        opts
    }
}

/// Returns the options in `options` that are invalid for `kind`.
pub fn invalid_options<'a>(kind: &FilesystemKind, options: &'a [String]) -> Vec<&'a str> {
    if !kind.forbids_ownership_options() {
        return Vec::new();
    }
    options
        .iter()
        .map(String::as_str)
        .filter(|o| is_ownership_option(o))
        .collect()
}

/// Returns true if a single option token is an owner/group/mask option.
pub fn is_ownership_option(option: &str) -> bool {
    let key = option.split_once('=').map_or(option, |(k, _)| k);
    OWNERSHIP_OPTION_KEYS.contains(&key) && option.contains('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Ownership = Ownership {
        uid: 1000,
        gid: 1001,
    };

    #[test]
    fn test_posix_kinds_get_base_only() {
        let policy = MountOptionPolicy::new();
        for kind in [
            FilesystemKind::Ext4,
            FilesystemKind::Xfs,
            FilesystemKind::Btrfs,
            FilesystemKind::parse("f2fs"),
        ] {
            assert_eq!(policy.options_for(&kind, OWNER), vec!["defaults", "nofail"]);
        }
    }

    #[test]
    fn test_ownership_kinds_get_ids() {
        let policy = MountOptionPolicy::new();
        let opts = policy.options_for(&FilesystemKind::Exfat, OWNER);
        assert_eq!(
            opts,
            vec!["defaults", "nofail", "uid=1000", "gid=1001", "umask=0002"]
        );
        assert!(
            policy
                .options_for(&FilesystemKind::Vfat, OWNER)
                .contains(&"uid=1000".to_string())
        );
    }

    #[test]
    fn test_extra_options_filtered_for_posix() {
        let policy = MountOptionPolicy::with_extra_options(["noatime", "uid=5", "defaults"]);
        let opts = policy.options_for(&FilesystemKind::Ext4, OWNER);
        assert_eq!(opts, vec!["defaults", "nofail", "noatime"]);
    }

    #[test]
    fn test_invalid_options() {
        let opts: Vec<String> = ["defaults", "uid=1000", "gid=1000", "noatime"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            invalid_options(&FilesystemKind::Ext4, &opts),
            vec!["uid=1000", "gid=1000"]
        );
        assert!(invalid_options(&FilesystemKind::Ntfs, &opts).is_empty());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(FilesystemKind::parse("ntfs3"), FilesystemKind::Ntfs);
        assert_eq!(FilesystemKind::parse("EXFAT"), FilesystemKind::Exfat);
        assert_eq!(FilesystemKind::Ntfs.table_name(), "ntfs3");
        assert_eq!(FilesystemKind::parse("zfs").table_name(), "zfs");
    }

    #[test]
    fn test_is_ownership_option() {
        assert!(is_ownership_option("uid=1000"));
        assert!(is_ownership_option("dmask=022"));
        assert!(!is_ownership_option("uid"));
        assert!(!is_ownership_option("uidx=1"));
        assert!(!is_ownership_option("noatime"));
    }
}
