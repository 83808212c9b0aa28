//! Tool settings loaded from `config.toml`.
//!
//! Every key is optional; missing keys fall back to the defaults for a
//! stock Samba host.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;

use crate::error::{Result, SettingsParseSnafu, SettingsReadSnafu};
use crate::fstab::FSTAB_PATH;
use crate::share::SMB_CONF_PATH;

pub const APP_NAME: &str = "mountshare";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// System-wide settings location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/mountshare/config.toml";

/// Configuration stored in config.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Persistent mount table.
    pub mount_table_path: PathBuf,
    /// Share daemon configuration file.
    pub share_config_path: PathBuf,
    /// systemd unit restarted after the share is configured.
    pub share_service: String,
    /// Command that checks the share configuration (`<validator> -s <file>`).
    pub validator: String,
    /// dump field for new mount table records.
    pub mount_dump: u8,
    /// fsck pass field for new mount table records.
    pub mount_pass: u16,
    /// Options appended after the generated ones.
    pub extra_mount_options: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mount_table_path: PathBuf::from(FSTAB_PATH),
            share_config_path: PathBuf::from(SMB_CONF_PATH),
            share_service: "smbd".to_string(),
            validator: "testparm".to_string(),
            mount_dump: 0,
            mount_pass: 0,
            extra_mount_options: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from an explicit file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context(SettingsReadSnafu { path })?;
        let settings = toml::from_str(&text).context(SettingsParseSnafu { path })?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Loads settings from `explicit`, or the first default location that
    /// exists, or built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for candidate in default_locations() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::default())
    }
}

/// Per-user location first, then the system-wide one.
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        locations.push(config_dir.join(APP_NAME).join(CONFIG_FILE_NAME));
    }
    locations.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    locations
}
