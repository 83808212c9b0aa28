//! mountshare-core: Core library for publishing a block device as a network share.
//!
//! This library makes a device mount persistently by volume UUID and exposes
//! the mounted directory as an SMB share for a single local user.
//!
//! # Modules
//!
//! - [`disk`]: Device resolution and inspection using `lsblk`
//! - [`preset`]: Filesystem kinds and mount option policy
//! - [`fstab`]: Fstab parsing and reconciliation
//! - [`share`]: smb.conf share block reconciliation
//! - [`transaction`]: Backup, atomic replace, and validated rollback for config files
//! - [`host`]: Mounting, ownership, and share daemon control
//! - [`confirm`]: Caller decisions for destructive steps
//! - [`settings`]: `config.toml` loading
//! - [`orchestrator`]: End-to-end setup sequence
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use mountshare_core::{
//!     LsblkInspector, NonInteractive, Orchestrator, Settings, SetupRequest, SystemHost,
//! };
//!
//! let settings = Settings::load(None).unwrap();
//! let host = SystemHost::new(&settings.share_service, &settings.validator);
//! let orchestrator = Orchestrator::new(&settings, &LsblkInspector, &host);
//!
//! let request = SetupRequest {
//!     device: "sdb1".to_string(),
//!     mount_point: PathBuf::from("/mnt/backup"),
//!     share_name: "backup".to_string(),
//!     user: "alice".to_string(),
//!     secret: "hunter2".to_string(),
//! };
//!
//! // Requires root
//! let report = orchestrator
//!     .run(&request, &mut NonInteractive::AssumeNo)
//!     .unwrap();
//! println!("{:?}", report.mount_table);
//! ```

pub mod confirm;
pub mod disk;
pub mod error;
pub mod fstab;
pub mod host;
pub mod orchestrator;
pub mod preset;
pub mod settings;
pub mod share;
pub mod transaction;

// Re-export commonly used types
pub use confirm::{Confirmation, ConfirmationPolicy, NonInteractive};
pub use disk::{DeviceIdentity, DeviceInspector, LsblkInspector};
pub use error::{Error, Result};
pub use fstab::{FstabEntry, MountDeclaration, TablePlan};
pub use host::{Host, SystemHost};
pub use orchestrator::{Orchestrator, SetupPlan, SetupReport, SetupRequest};
pub use preset::{FilesystemKind, MountOptionPolicy, Ownership};
pub use settings::Settings;
pub use share::{ShareDeclaration, SharePlan};
pub use transaction::{ApplyOutcome, ConfigWriter};
