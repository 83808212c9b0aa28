//! Backup-then-commit writes for configuration stores.
//!
//! Every mutating edit follows the same sequence:
//! 1. read the live store and check it still equals the planned snapshot
//! 2. write a timestamped backup (`<store>.bak.<YYYYMMDDHHMMSS>`) and sync it
//! 3. write the new content to a sibling temp file and rename it over the store
//! 4. run the optional validator; on failure restore the backup content
//!
//! Backups are never deleted here, in either outcome.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use snafu::OptionExt;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{IoResultExt, Result, StoreChangedSnafu};
use crate::fstab::TablePlan;
use crate::share::SharePlan;

/// Timestamp format used in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Upper bound on same-second backup name collisions.
const MAX_BACKUP_SUFFIX: u32 = 1000;

/// An edit that can be rendered against the current store content.
pub trait StoreEdit {
    /// Returns true if rendering would change the content.
    fn is_mutating(&self) -> bool {
        true
    }

    /// Produces the new store content from the snapshot the edit was
    /// planned against, or None if `current` is not that snapshot.
    fn render(&self, current: &str) -> Option<String>;
}

impl StoreEdit for TablePlan {
    fn is_mutating(&self) -> bool {
        TablePlan::is_mutating(self)
    }

    fn render(&self, current: &str) -> Option<String> {
        self.apply(current)
    }
}

impl StoreEdit for SharePlan {
    fn render(&self, current: &str) -> Option<String> {
        self.apply(current)
    }
}

/// Validator invoked after the new content is in place.
pub type Validator<'a> = &'a dyn Fn(&Path) -> std::result::Result<(), String>;

/// Result of a transactional apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing to change; no backup was taken.
    Unchanged,
    /// New content is live; the backup is kept as an audit trail.
    Committed { backup: PathBuf },
    /// Validation failed and the prior content was restored.
    RolledBack { backup: PathBuf, reason: String },
}

impl ApplyOutcome {
    pub fn backup(&self) -> Option<&Path> {
        match self {
            ApplyOutcome::Unchanged => None,
            ApplyOutcome::Committed { backup } | ApplyOutcome::RolledBack { backup, .. } => {
                Some(backup)
            }
        }
    }
}

/// Writes configuration stores with backup and optional rollback.
#[derive(Debug, Clone, Copy)]
pub struct ConfigWriter {
    clock: fn() -> DateTime<Utc>,
}

impl Default for ConfigWriter {
    fn default() -> Self {
        Self { clock: Utc::now }
    }
}

impl ConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a fixed clock for backup names.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }

    /// Applies `edit` to the store at `path`.
    ///
    /// `snapshot` is the content `edit` was planned against. If the live
    /// store no longer equals it, nothing is written and
    /// [`Error::StoreChanged`](crate::Error::StoreChanged) is returned.
    ///
    /// A store that does not exist yet is treated as empty. If validation of
    /// such a store fails, the rollback removes the file again.
    pub fn apply(
        &self,
        path: &Path,
        snapshot: &str,
        edit: &dyn StoreEdit,
        validate: Option<Validator<'_>>,
    ) -> Result<ApplyOutcome> {
        if !edit.is_mutating() {
            debug!(path = %path.display(), "store already up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        let prior = read_existing(path)?;
        let current = prior.as_deref().unwrap_or_default();
        if current != snapshot {
            warn!(path = %path.display(), "store changed since it was planned");
            return StoreChangedSnafu { path }.fail();
        }
        let updated = edit.render(current).context(StoreChangedSnafu { path })?;

        let backup = self.write_backup(path, current)?;
        info!(path = %path.display(), backup = %backup.display(), "backed up store");

        replace_atomically(path, &updated)?;
        info!(path = %path.display(), "wrote store");

        let Some(validate) = validate else {
            return Ok(ApplyOutcome::Committed { backup });
        };

        match validate(path) {
            Ok(()) => {
                info!(path = %path.display(), "store passed validation");
                Ok(ApplyOutcome::Committed { backup })
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "validation failed, restoring backup");
                match &prior {
                    Some(content) => replace_atomically(path, content)?,
                    None => fs::remove_file(path).store_write_context(path)?,
                }
                Ok(ApplyOutcome::RolledBack { backup, reason })
            }
        }
    }

    /// Writes `content` to a fresh backup file next to `path`.
    fn write_backup(&self, path: &Path, content: &str) -> Result<PathBuf> {
        let timestamp = (self.clock)().format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let base = backup_path(path, &timestamp);

        let mut candidate = base.clone();
        let mut suffix = 0;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .and_then(|()| file.sync_all())
                        .backup_context(&candidate)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_BACKUP_SUFFIX => {
                    suffix += 1;
                    candidate = PathBuf::from(format!("{}.{}", base.display(), suffix));
                }
                Err(e) => return Err(e).backup_context(&candidate),
            }
        }
    }
}

/// Returns `<path>.bak.<timestamp>`.
pub fn backup_path(path: &Path, timestamp: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak.{}", timestamp));
    PathBuf::from(name)
}

/// Reads a store, treating a missing file as empty.
pub fn read_store(path: &Path) -> Result<String> {
    Ok(read_existing(path)?.unwrap_or_default())
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).store_read_context(path),
    }
}

/// Writes `content` to a temp file beside `path` and renames it into place.
fn replace_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).store_write_context(path)?;
    temp.write_all(content.as_bytes()).store_write_context(path)?;

    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file()
            .set_permissions(metadata.permissions())
            .store_write_context(path)?;
    }

    temp.as_file().sync_all().store_write_context(path)?;
    temp.persist(path)
        .map_err(|e| e.error)
        .store_write_context(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fstab::{self, MountDeclaration};
    use crate::preset::FilesystemKind;
    use crate::share::{self, ShareDeclaration};
    use chrono::TimeZone;
    use std::cell::Cell;
    use tempfile::TempDir;

    const TABLE: &str = "UUID=root / ext4 defaults 0 1\n";
    const SMB: &str = "[global]\n   workgroup = WORKGROUP\n";

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    fn writer() -> ConfigWriter {
        ConfigWriter::with_clock(fixed_clock)
    }

    fn backup_plan() -> fstab::TablePlan {
        let desired = MountDeclaration::new(
            "ABCD-1234",
            "/mnt/backup",
            FilesystemKind::Ext4,
            vec!["defaults".to_string()],
        );
        fstab::reconcile(&desired, TABLE)
    }

    fn share_plan() -> share::SharePlan {
        let desired = ShareDeclaration::new("backup", "/mnt/backup", "alice").unwrap();
        share::reconcile(&desired, SMB)
    }

    #[test]
    fn test_backup_path_format() {
        let path = backup_path(Path::new("/etc/fstab"), "20240309070501");
        assert_eq!(path, PathBuf::from("/etc/fstab.bak.20240309070501"));
    }

    #[test]
    fn test_commit_without_validator() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        fs::write(&store, TABLE).unwrap();

        let outcome = writer().apply(&store, TABLE, &backup_plan(), None).unwrap();
        let backup = dir.path().join("fstab.bak.20240309070501");
        assert_eq!(
            outcome,
            ApplyOutcome::Committed {
                backup: backup.clone()
            }
        );

        assert_eq!(fs::read_to_string(&backup).unwrap(), TABLE);
        assert_eq!(
            fs::read_to_string(&store).unwrap(),
            format!("{}UUID=ABCD-1234 /mnt/backup ext4 defaults 0 0\n", TABLE)
        );
    }

    #[test]
    fn test_noop_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        let content = format!("{}UUID=ABCD-1234 /mnt/backup ext4 defaults 0 0\n", TABLE);
        fs::write(&store, &content).unwrap();

        let desired = MountDeclaration::new(
            "ABCD-1234",
            "/mnt/backup",
            FilesystemKind::Ext4,
            vec!["defaults".to_string()],
        );
        let plan = fstab::reconcile(&desired, &content);
        let outcome = writer().apply(&store, &content, &plan, None).unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_validation_pass_commits() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("smb.conf");
        fs::write(&store, SMB).unwrap();

        let seen = Cell::new(false);
        let validator = |p: &Path| -> std::result::Result<(), String> {
            seen.set(true);
            let text = fs::read_to_string(p).map_err(|e| e.to_string())?;
            if text.contains("[backup]") {
                Ok(())
            } else {
                Err("share missing".to_string())
            }
        };

        let outcome = writer()
            .apply(&store, SMB, &share_plan(), Some(&validator))
            .unwrap();
        assert!(seen.get());
        assert!(matches!(outcome, ApplyOutcome::Committed { .. }));
        assert!(fs::read_to_string(&store).unwrap().contains("[backup]"));
        assert_eq!(
            fs::read_to_string(outcome.backup().unwrap()).unwrap(),
            SMB
        );
    }

    #[test]
    fn test_validation_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("smb.conf");
        fs::write(&store, SMB).unwrap();

        let validator = |_: &Path| -> std::result::Result<(), String> {
            Err("Unknown parameter encountered".to_string())
        };
        let outcome = writer()
            .apply(&store, SMB, &share_plan(), Some(&validator))
            .unwrap();

        match &outcome {
            ApplyOutcome::RolledBack { backup, reason } => {
                assert_eq!(reason, "Unknown parameter encountered");
                assert!(backup.exists());
                assert_eq!(fs::read_to_string(backup).unwrap(), SMB);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read_to_string(&store).unwrap(), SMB);
    }

    #[test]
    fn test_same_second_backups_do_not_clobber() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("smb.conf");
        fs::write(&store, SMB).unwrap();

        let first = writer().apply(&store, SMB, &share_plan(), None).unwrap();
        let after_first = fs::read_to_string(&store).unwrap();
        let second_plan = share::reconcile(
            &ShareDeclaration::new("backup", "/mnt/other", "alice").unwrap(),
            &after_first,
        );
        let second = writer()
            .apply(&store, &after_first, &second_plan, None)
            .unwrap();

        let first_backup = first.backup().unwrap().to_path_buf();
        let second_backup = second.backup().unwrap().to_path_buf();
        assert_ne!(first_backup, second_backup);
        assert_eq!(
            second_backup,
            dir.path().join("smb.conf.bak.20240309070501.1")
        );
        assert_eq!(fs::read_to_string(first_backup).unwrap(), SMB);
        assert_eq!(fs::read_to_string(second_backup).unwrap(), after_first);
    }

    #[test]
    fn test_missing_store_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("smb.conf");

        let desired = ShareDeclaration::new("backup", "/mnt/backup", "alice").unwrap();
        let plan = share::reconcile(&desired, "");
        let outcome = writer().apply(&store, "", &plan, None).unwrap();

        assert_eq!(fs::read_to_string(outcome.backup().unwrap()).unwrap(), "");
        assert_eq!(fs::read_to_string(&store).unwrap(), desired.to_block());
    }

    #[test]
    fn test_rollback_of_new_store_removes_it() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("smb.conf");

        let desired = ShareDeclaration::new("backup", "/mnt/backup", "alice").unwrap();
        let plan = share::reconcile(&desired, "");
        let validator =
            |_: &Path| -> std::result::Result<(), String> { Err("bad".to_string()) };
        let outcome = writer()
            .apply(&store, "", &plan, Some(&validator))
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::RolledBack { .. }));
        assert!(!store.exists());
        assert_eq!(fs::read_to_string(outcome.backup().unwrap()).unwrap(), "");
    }

    #[test]
    fn test_changed_store_is_not_written() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        let edited = format!("UUID=extra /mnt/extra xfs defaults 0 0\n{}", TABLE);
        fs::write(&store, &edited).unwrap();

        let err = writer()
            .apply(&store, TABLE, &backup_plan(), None)
            .unwrap_err();
        assert!(matches!(err, crate::Error::StoreChanged { .. }));
        assert_eq!(fs::read_to_string(&store).unwrap(), edited);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_plan_from_other_snapshot_is_not_written() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        let table = "UUID=ABCD-1234 /mnt/old ext4 defaults 0 0\n";
        let desired = MountDeclaration::new(
            "ABCD-1234",
            "/mnt/new",
            FilesystemKind::Ext4,
            vec!["defaults".to_string()],
        );
        let plan = fstab::reconcile(&desired, table);

        // Snapshot and store agree, but the plan was made for another table
        fs::write(&store, TABLE).unwrap();
        let err = writer().apply(&store, TABLE, &plan, None).unwrap_err();
        assert!(matches!(err, crate::Error::StoreChanged { .. }));
        assert_eq!(fs::read_to_string(&store).unwrap(), TABLE);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_backup_failure_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        fs::write(&store, TABLE).unwrap();
        // Occupy every candidate backup name.
        let blocker = dir.path().join("fstab.bak.20240309070501");
        fs::create_dir(&blocker).unwrap();
        for n in 1..=MAX_BACKUP_SUFFIX {
            fs::create_dir(dir.path().join(format!("fstab.bak.20240309070501.{}", n))).unwrap();
        }

        let err = writer()
            .apply(&store, TABLE, &backup_plan(), None)
            .unwrap_err();
        assert!(matches!(err, crate::Error::Backup { .. }));
        assert_eq!(fs::read_to_string(&store).unwrap(), TABLE);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = dir.path().join("fstab");
        fs::write(&store, TABLE).unwrap();
        fs::set_permissions(&store, fs::Permissions::from_mode(0o644)).unwrap();

        writer().apply(&store, TABLE, &backup_plan(), None).unwrap();
        let mode = fs::metadata(&store).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
