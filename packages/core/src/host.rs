//! Host collaborators: mounting, ownership, and share daemon control.
//!
//! The orchestrator only talks to the system through the [`Host`] trait so
//! that the sequencing logic can be exercised without root or real devices.
//! [`SystemHost`] is the implementation that shells out to the usual tools.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use nix::unistd::{Gid, Uid, User, chown};
use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::preset::Ownership;

/// Side-effecting operations the orchestrator needs from the host.
pub trait Host {
    /// Looks up a local account by name.
    fn lookup_user(&self, name: &str) -> Result<Option<Ownership>>;

    /// Unmounts whatever is mounted at `path`.
    fn unmount(&self, path: &Path) -> Result<()>;

    /// Creates the mount point directory if it does not exist.
    fn create_mount_point(&self, path: &Path) -> Result<()>;

    /// Makes the init system pick up mount table changes.
    fn reload_mount_units(&self) -> Result<()>;

    /// Mounts the mount table entry for `target`.
    fn mount(&self, target: &Path) -> Result<()>;

    /// Hands the mounted directory to `owner`.
    fn set_ownership(&self, path: &Path, owner: Ownership) -> Result<()>;

    /// Fails if the share daemon is not installed.
    fn ensure_share_daemon(&self) -> Result<()>;

    /// Runs the share daemon's configuration check against `config`.
    fn validate_share_config(&self, config: &Path) -> std::result::Result<(), String>;

    /// Sets the share access secret for `user`.
    fn set_share_password(&self, user: &str, secret: &str) -> Result<()>;

    /// Restarts the share daemon so it serves the new configuration.
    fn restart_share_daemon(&self) -> Result<()>;
}

/// [`Host`] implementation that runs the real system tools.
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// systemd unit of the share daemon (e.g., "smbd").
    pub share_service: String,
    /// Configuration checker (e.g., "testparm").
    pub validator: String,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            share_service: "smbd".to_string(),
            validator: "testparm".to_string(),
        }
    }
}

impl SystemHost {
    pub fn new(share_service: impl Into<String>, validator: impl Into<String>) -> Self {
        Self {
            share_service: share_service.into(),
            validator: validator.into(),
        }
    }
}

impl Host for SystemHost {
    fn lookup_user(&self, name: &str) -> Result<Option<Ownership>> {
        let user = User::from_name(name).map_err(|e| Error::CommandExecution {
            command: format!("getpwnam {}", name),
            source: std::io::Error::from(e),
        })?;
        Ok(user.map(|u| Ownership {
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        let output = run("umount", &[&path.display().to_string()])?;
        if !output.status.success() {
            return Err(Error::Unmount {
                path: path.to_path_buf(),
                message: stderr_of(&output),
            });
        }
        info!(path = %path.display(), "unmounted");
        Ok(())
    }

    fn create_mount_point(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).mount_point_context(path)?;
            debug!(path = %path.display(), "created mount point");
        }
        Ok(())
    }

    fn reload_mount_units(&self) -> Result<()> {
        run_checked("systemctl", &["daemon-reload"])
    }

    fn mount(&self, target: &Path) -> Result<()> {
        let output = run("mount", &[&target.display().to_string()])?;
        if !output.status.success() {
            return Err(Error::Mount {
                path: target.to_path_buf(),
                message: stderr_of(&output),
            });
        }
        info!(path = %target.display(), "mounted");
        Ok(())
    }

    fn set_ownership(&self, path: &Path, owner: Ownership) -> Result<()> {
        chown(
            path,
            Some(Uid::from_raw(owner.uid)),
            Some(Gid::from_raw(owner.gid)),
        )
        .map_err(|source| Error::Ownership {
            path: path.to_path_buf(),
            source,
        })
    }

    fn ensure_share_daemon(&self) -> Result<()> {
        match Command::new(&self.validator).arg("--version").output() {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(Error::ShareDaemonMissing {
                message: stderr_of(&output),
            }),
            Err(e) => Err(Error::ShareDaemonMissing {
                message: format!("{}: {}", self.validator, e),
            }),
        }
    }

    fn validate_share_config(&self, config: &Path) -> std::result::Result<(), String> {
        let output = Command::new(&self.validator)
            .args(["-s", &config.display().to_string()])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.validator, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(stderr_of(&output))
        }
    }

    fn set_share_password(&self, user: &str, secret: &str) -> Result<()> {
        let command = format!("smbpasswd -s -a {}", user);
        let mut child = Command::new("smbpasswd")
            .args(["-s", "-a", user])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .command_context(&command)?;

        if let Some(mut stdin) = child.stdin.take() {
            // smbpasswd -s reads the new password twice
            stdin
                .write_all(format!("{secret}\n{secret}\n").as_bytes())
                .command_context(&command)?;
        }

        let output = child.wait_with_output().command_context(&command)?;
        if !output.status.success() {
            return Err(Error::CommandExit {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: stderr_of(&output),
            });
        }
        info!(user, "set share credentials");
        Ok(())
    }

    fn restart_share_daemon(&self) -> Result<()> {
        run_checked("systemctl", &["restart", &self.share_service])
    }
}

/// Runs a command and captures its output.
fn run(cmd: &str, args: &[&str]) -> Result<Output> {
    debug!(cmd, ?args, "running command");
    Command::new(cmd)
        .args(args)
        .output()
        .command_context(format!("{} {}", cmd, args.join(" ")))
}

/// Runs a command and fails on a non-zero exit code.
fn run_checked(cmd: &str, args: &[&str]) -> Result<()> {
    let output = run(cmd, args)?;
    if !output.status.success() {
        return Err(Error::CommandExit {
            command: format!("{} {}", cmd, args.join(" ")),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr_of(&output),
        });
    }
    Ok(())
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Returns the mount point as the absolute path the tools expect.
pub fn normalize_mount_point(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(Error::invalid(
            "mount point",
            format!("{} is not absolute", path.display()),
        ));
    }
    if path == Path::new("/") {
        return Err(Error::invalid("mount point", "refusing to mount over /"));
    }
    Ok(path.components().collect())
}
