//! Unified error types for the mountshare-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Caller supplied an empty or malformed value.
    #[snafu(display("invalid {field}: {message}"))]
    InvalidInput { field: String, message: String },

    /// Token does not resolve to an existing block device.
    #[snafu(display("{} is not a block device", path.display()))]
    NotABlockDevice { path: PathBuf },

    /// Volume identifier or filesystem kind could not be read.
    #[snafu(display("cannot determine {what} for {}", device.display()))]
    IdentityUnavailable { device: PathBuf, what: String },

    /// The caller declined a confirmation.
    #[snafu(display("aborted by user: {reason}"))]
    AbortedByUser { reason: String },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse lsblk JSON output.
    #[snafu(display("failed to parse lsblk output: {message}"))]
    LsblkParse { message: String },

    /// A mount table record is malformed.
    #[snafu(display("invalid fstab line '{line}': {message}"))]
    FstabParse { line: String, message: String },

    /// The store no longer matches the snapshot a plan was computed from.
    #[snafu(display("{} changed while the edit was pending; re-run to plan again", path.display()))]
    StoreChanged { path: PathBuf },

    /// Configuration store cannot be read.
    #[snafu(display("failed to read {}", path.display()))]
    StoreRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration store cannot be written.
    #[snafu(display("failed to write {}", path.display()))]
    StoreWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create backup. Nothing was mutated.
    #[snafu(display("failed to create backup at {}", path.display()))]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Share configuration failed validation and was restored from backup.
    #[snafu(display(
        "share configuration {} failed validation (restored from {}): {reason}",
        path.display(),
        backup.display()
    ))]
    ShareValidation {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount operation failed.
    #[snafu(display("failed to mount {}: {message}", path.display()))]
    Mount { path: PathBuf, message: String },

    /// Unmount operation failed.
    #[snafu(display("failed to unmount {}: {message}", path.display()))]
    Unmount { path: PathBuf, message: String },

    /// Changing ownership of the mounted directory failed.
    #[snafu(display("failed to change ownership of {}", path.display()))]
    Ownership { path: PathBuf, source: nix::Error },

    /// The share daemon is not available on this host.
    #[snafu(display("share daemon is not installed: {message}"))]
    ShareDaemonMissing { message: String },

    /// Settings file cannot be read.
    #[snafu(display("failed to read settings at {}", path.display()))]
    SettingsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Settings file is not valid TOML.
    #[snafu(display("failed to parse settings at {}", path.display()))]
    SettingsParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Error {
    /// Returns true when the run stopped because a confirmation was declined.
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Error::AbortedByUser { .. })
    }

    /// Returns true for errors caused by bad caller input.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput { .. } | Error::NotABlockDevice { .. }
        )
    }

    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for store read errors.
    fn store_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for store write errors.
    fn store_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for backup errors.
    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn store_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StoreReadSnafu { path: path.into() })
    }

    fn store_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StoreWriteSnafu { path: path.into() })
    }

    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BackupSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}
