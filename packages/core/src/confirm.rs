//! Caller decisions for destructive steps.
//!
//! Reconciliation only computes plans. Whether a conflicting mount entry may
//! be replaced, a mounted device unmounted, or an existing share block
//! discarded is decided by a [`ConfirmationPolicy`] supplied by the caller.

use std::fmt;
use std::path::PathBuf;

use crate::fstab::TableConflict;

/// A destructive step waiting for a caller decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The device is mounted and must be unmounted first.
    UnmountDevice {
        device: PathBuf,
        mountpoint: PathBuf,
    },
    /// An existing mount table record will be overwritten.
    ReplaceMountEntry {
        conflict: TableConflict,
        existing: String,
        replacement: String,
    },
    /// An existing share block will be removed and recreated.
    ReplaceShareBlock { share_name: String },
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confirmation::UnmountDevice { device, mountpoint } => write!(
                f,
                "{} is mounted at {}. Unmount it",
                device.display(),
                mountpoint.display()
            ),
            Confirmation::ReplaceMountEntry {
                conflict,
                existing,
                replacement,
            } => {
                match conflict {
                    TableConflict::VolumeMovedPath { existing_path } => write!(
                        f,
                        "volume is already declared at {}",
                        existing_path.display()
                    )?,
                    TableConflict::PathOccupiedByOtherVolume { existing_spec } => {
                        write!(f, "mount point is already used by {}", existing_spec)?
                    }
                }
                write!(
                    f,
                    ".\n  current: {}\n  new:     {}\nReplace the entry",
                    existing, replacement
                )
            }
            Confirmation::ReplaceShareBlock { share_name } => write!(
                f,
                "share [{}] already exists. Replace it",
                share_name
            ),
        }
    }
}

/// Decides whether a destructive step may proceed.
pub trait ConfirmationPolicy {
    fn confirm(&mut self, request: &Confirmation) -> bool;
}

/// Fixed answers for non-interactive runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonInteractive {
    /// Approve every destructive step.
    AssumeYes,
    /// Decline every destructive step.
    AssumeNo,
}

impl ConfirmationPolicy for NonInteractive {
    fn confirm(&mut self, _request: &Confirmation) -> bool {
        matches!(self, NonInteractive::AssumeYes)
    }
}

impl<F> ConfirmationPolicy for F
where
    F: FnMut(&Confirmation) -> bool,
{
    fn confirm(&mut self, request: &Confirmation) -> bool {
        self(request)
    }
}
