//! End-to-end share setup.
//!
//! Sequence: inspect device → compose mount declaration → reconcile and
//! commit the mount table → mount → set ownership → reconcile and commit the
//! share configuration (validated, rolled back on failure) → set credentials
//! → restart the share daemon.
//!
//! The mount table is never rolled back by a later share failure: once the
//! device is mounted from the committed entry it is a valid partial state.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::confirm::{Confirmation, ConfirmationPolicy};
use crate::disk::{DeviceIdentity, DeviceInspector};
use crate::error::{Error, Result};
use crate::fstab::{self, MountDeclaration, TablePlan};
use crate::host::{Host, normalize_mount_point};
use crate::preset::{MountOptionPolicy, Ownership};
use crate::settings::Settings;
use crate::share::{self, ShareDeclaration, SharePlan};
use crate::transaction::{ApplyOutcome, ConfigWriter, Validator, read_store};

/// What the caller wants provisioned.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    /// Device name or path (e.g., "sdb1", "/dev/disk/by-uuid/...").
    pub device: String,
    pub mount_point: PathBuf,
    pub share_name: String,
    /// Local account granted access to the share.
    pub user: String,
    /// Share access secret for `user`.
    pub secret: String,
}

/// Everything a run would change, computed without side effects.
#[derive(Debug, Clone)]
pub struct SetupPlan {
    pub device: DeviceIdentity,
    pub owner: Ownership,
    pub mount: MountDeclaration,
    pub table_plan: TablePlan,
    pub share: ShareDeclaration,
    pub share_plan: SharePlan,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct SetupReport {
    pub device: DeviceIdentity,
    pub mount_point: PathBuf,
    pub share_name: String,
    pub mount_table: ApplyOutcome,
    pub share_config: ApplyOutcome,
}

/// Sequences inspection, reconciliation, and the host collaborators.
pub struct Orchestrator<'a, I: DeviceInspector, H: Host> {
    settings: &'a Settings,
    inspector: &'a I,
    host: &'a H,
    writer: ConfigWriter,
    policy: MountOptionPolicy,
}

impl<'a, I: DeviceInspector, H: Host> Orchestrator<'a, I, H> {
    pub fn new(settings: &'a Settings, inspector: &'a I, host: &'a H) -> Self {
        Self {
            settings,
            inspector,
            host,
            writer: ConfigWriter::new(),
            policy: MountOptionPolicy::with_extra_options(settings.extra_mount_options.clone()),
        }
    }

    /// Replaces the store writer (used to pin backup timestamps).
    pub fn with_writer(mut self, writer: ConfigWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Computes both plans without touching any store or device.
    pub fn plan(&self, request: &SetupRequest) -> Result<SetupPlan> {
        let (target, share, owner) = self.validate(request)?;
        let device = self.identify(&request.device)?;
        let mount = self.declaration(&device, &target, owner);

        let table = read_store(&self.settings.mount_table_path)?;
        let table_plan = fstab::reconcile(&mount, &table);
        let store = read_store(&self.settings.share_config_path)?;
        let share_plan = share::reconcile(&share, &store);

        Ok(SetupPlan {
            device,
            owner,
            mount,
            table_plan,
            share,
            share_plan,
        })
    }

    /// Runs the full setup.
    ///
    /// Any declined confirmation ends the run with [`Error::AbortedByUser`].
    pub fn run(
        &self,
        request: &SetupRequest,
        confirm: &mut dyn ConfirmationPolicy,
    ) -> Result<SetupReport> {
        let (target, share, owner) = self.validate(request)?;
        if request.secret.is_empty() {
            return Err(Error::invalid("share secret", "must not be empty"));
        }

        let device = self.identify(&request.device)?;
        let already_at_target = self.release_device(&device, &target, confirm)?;

        let declaration = self.declaration(&device, &target, owner);
        let mount_table = self.commit_mount_table(&declaration, confirm)?;

        if already_at_target {
            info!(path = %target.display(), "device already mounted at target");
        } else {
            self.host.create_mount_point(&target)?;
            self.host.reload_mount_units()?;
            self.host.mount(&target)?;
        }

        if device.kind.forbids_ownership_options() {
            self.host.set_ownership(&target, owner)?;
            info!(path = %target.display(), uid = owner.uid, gid = owner.gid, "set ownership");
        }

        self.host.ensure_share_daemon()?;
        let share_config = self.commit_share_config(&share, confirm)?;

        self.host.set_share_password(&share.permitted_user, &request.secret)?;
        self.host.restart_share_daemon()?;
        info!(share = %share.share_name, path = %target.display(), "share is live");

        Ok(SetupReport {
            device,
            mount_point: target,
            share_name: share.share_name,
            mount_table,
            share_config,
        })
    }

    /// Checks caller input before anything is inspected or mutated.
    fn validate(&self, request: &SetupRequest) -> Result<(PathBuf, ShareDeclaration, Ownership)> {
        let target = normalize_mount_point(&request.mount_point)?;
        let share = ShareDeclaration::new(&request.share_name, &target, request.user.trim())?;
        let owner = self
            .host
            .lookup_user(&share.permitted_user)?
            .ok_or_else(|| {
                Error::invalid(
                    "user",
                    format!("no local account named '{}'", share.permitted_user),
                )
            })?;
        Ok((target, share, owner))
    }

    fn identify(&self, token: &str) -> Result<DeviceIdentity> {
        let path = self.inspector.resolve(token)?;
        let device = self.inspector.inspect(&path)?;
        info!(
            device = %device.path.display(),
            uuid = %device.volume_id,
            kind = %device.kind,
            "inspected device"
        );
        Ok(device)
    }

    /// Unmounts the device if it is mounted somewhere other than `target`.
    ///
    /// Returns true if it is already mounted at `target`.
    fn release_device(
        &self,
        device: &DeviceIdentity,
        target: &Path,
        confirm: &mut dyn ConfirmationPolicy,
    ) -> Result<bool> {
        let Some(mountpoint) = &device.mountpoint else {
            return Ok(false);
        };
        if mountpoint == target {
            return Ok(true);
        }

        let request = Confirmation::UnmountDevice {
            device: device.path.clone(),
            mountpoint: mountpoint.clone(),
        };
        if !confirm.confirm(&request) {
            return Err(Error::AbortedByUser {
                reason: format!(
                    "{} is mounted at {}",
                    device.path.display(),
                    mountpoint.display()
                ),
            });
        }
        self.host.unmount(mountpoint)?;
        Ok(false)
    }

    fn declaration(
        &self,
        device: &DeviceIdentity,
        target: &Path,
        owner: Ownership,
    ) -> MountDeclaration {
        let options = self.policy.options_for(&device.kind, owner);
        let mut declaration =
            MountDeclaration::new(&device.volume_id, target, device.kind.clone(), options);
        declaration.dump = self.settings.mount_dump;
        declaration.pass = self.settings.mount_pass;
        declaration
    }

    fn commit_mount_table(
        &self,
        declaration: &MountDeclaration,
        confirm: &mut dyn ConfirmationPolicy,
    ) -> Result<ApplyOutcome> {
        let path = &self.settings.mount_table_path;
        let table = read_store(path)?;
        let plan = fstab::reconcile(declaration, &table);

        if let TablePlan::ReplaceLine {
            conflict,
            original,
            replacement,
            ..
        } = &plan
        {
            warn!(?conflict, existing = %original, "mount table conflict");
            let request = Confirmation::ReplaceMountEntry {
                conflict: conflict.clone(),
                existing: original.clone(),
                replacement: replacement.clone(),
            };
            if !confirm.confirm(&request) {
                return Err(Error::AbortedByUser {
                    reason: format!("kept existing mount table entry '{}'", original),
                });
            }
        }
        if let TablePlan::StripInvalidOptions { removed, .. } = &plan {
            info!(?removed, "stripping options invalid for {}", declaration.kind);
        }

        self.writer.apply(path, &table, &plan, None)
    }

    fn commit_share_config(
        &self,
        share: &ShareDeclaration,
        confirm: &mut dyn ConfirmationPolicy,
    ) -> Result<ApplyOutcome> {
        let path = &self.settings.share_config_path;
        let store = read_store(path)?;
        let plan = share::reconcile(share, &store);

        if plan.requires_confirmation() {
            let request = Confirmation::ReplaceShareBlock {
                share_name: share.share_name.clone(),
            };
            if !confirm.confirm(&request) {
                return Err(Error::AbortedByUser {
                    reason: format!("kept existing share [{}]", share.share_name),
                });
            }
        }

        let validate: Validator<'_> = &|config: &Path| self.host.validate_share_config(config);
        let outcome = self.writer.apply(path, &store, &plan, Some(validate))?;

        if let ApplyOutcome::RolledBack { backup, reason } = outcome {
            return Err(Error::ShareValidation {
                path: path.clone(),
                backup,
                reason,
            });
        }
        Ok(outcome)
    }
}
