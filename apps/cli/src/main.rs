//! mountshare CLI - Mount a block device persistently and publish it as an SMB share.

mod prompt;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use mountshare_core::{
    ApplyOutcome, ConfirmationPolicy, DeviceInspector, LsblkInspector, NonInteractive,
    Orchestrator, Settings, SetupPlan, SetupRequest, SharePlan, SystemHost, TablePlan,
};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use crate::prompt::TerminalPrompt;

/// Environment variable holding the share secret for non-interactive runs.
const SECRET_ENV: &str = "MOUNTSHARE_SHARE_SECRET";

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(context(false), display("{source}"))]
    Core { source: mountshare_core::Error },

    #[snafu(display("failed to read password: {source}"))]
    Prompt { source: std::io::Error },

    #[snafu(display("passwords do not match"))]
    SecretMismatch,

    #[snafu(display("no share password: set MOUNTSHARE_SHARE_SECRET when running with --no-input"))]
    SecretMissing,

    #[snafu(display("failed to encode JSON: {source}"))]
    Json { source: serde_json::Error },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Core { source } if source.is_user_abort() => 3,
            CliError::Core { source } if source.is_user_input() => 2,
            CliError::SecretMismatch | CliError::SecretMissing => 2,
            _ => 1,
        }
    }
}

/// Mount a block device by UUID and share it over SMB.
#[derive(Parser)]
#[command(name = "mountshare")]
#[command(about = "Provision a persistent mount and an SMB share for it", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user, then system config.toml).
    #[arg(long, global = true, env = "MOUNTSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the mount table path.
    #[arg(long, global = true)]
    fstab: Option<PathBuf>,

    /// Override the share configuration path.
    #[arg(long = "smb-conf", global = true)]
    smb_conf: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the device, write the share, and set the user's share password.
    Setup {
        #[command(flatten)]
        target: TargetArgs,

        /// Approve every destructive step without asking.
        #[arg(long, conflicts_with = "no_input")]
        yes: bool,

        /// Never prompt; decline every destructive step.
        #[arg(long)]
        no_input: bool,
    },

    /// Show what setup would change without changing anything.
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the identity of a block device.
    Inspect {
        /// Device name or path (e.g., sdb1, /dev/sdb1).
        #[arg(long)]
        device: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Device name or path (e.g., sdb1, /dev/sdb1).
    #[arg(long)]
    device: String,

    /// Absolute directory to mount the device on.
    #[arg(long)]
    mount_point: PathBuf,

    /// Name of the share section.
    #[arg(long)]
    share_name: String,

    /// Local account allowed to access the share.
    #[arg(long)]
    user: String,
}

impl TargetArgs {
    fn into_request(self, secret: String) -> SetupRequest {
        SetupRequest {
            device: self.device,
            mount_point: self.mount_point,
            share_name: self.share_name,
            user: self.user,
            secret,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(log_level: &str) {
    let level: tracing::Level = log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(path) = cli.fstab {
        settings.mount_table_path = path;
    }
    if let Some(path) = cli.smb_conf {
        settings.share_config_path = path;
    }

    let inspector = LsblkInspector;
    let host = SystemHost::new(&settings.share_service, &settings.validator);
    let orchestrator = Orchestrator::new(&settings, &inspector, &host);

    match cli.command {
        Commands::Setup {
            target,
            yes,
            no_input,
        } => {
            let secret = share_secret(&target.user, no_input)?;
            let request = target.into_request(secret);

            let mut policy: Box<dyn ConfirmationPolicy> = if yes {
                Box::new(NonInteractive::AssumeYes)
            } else if no_input {
                Box::new(NonInteractive::AssumeNo)
            } else {
                Box::new(TerminalPrompt::stdin())
            };

            let report = orchestrator.run(&request, policy.as_mut())?;
            println!(
                "Share [{}] is serving {} ({} on {})",
                report.share_name,
                report.mount_point.display(),
                report.device.kind,
                report.device.path.display()
            );
            println!("  mount table:  {}", describe_outcome(&report.mount_table));
            println!("  share config: {}", describe_outcome(&report.share_config));
        }
        Commands::Plan { target } => {
            let request = target.into_request(String::new());
            let plan = orchestrator.plan(&request)?;
            print_plan(&plan);
        }
        Commands::Inspect { device, json } => {
            let path = inspector.resolve(&device)?;
            let identity = inspector.inspect(&path)?;
            if json {
                let text = serde_json::to_string_pretty(&identity).context(JsonSnafu)?;
                println!("{}", text);
            } else {
                println!("device:     {}", identity.path.display());
                println!("uuid:       {}", identity.volume_id);
                println!("filesystem: {}", identity.kind);
                if let Some(label) = &identity.label {
                    println!("label:      {}", label);
                }
                match &identity.mountpoint {
                    Some(mountpoint) => println!("mounted at: {}", mountpoint.display()),
                    None => println!("mounted at: (not mounted)"),
                }
            }
        }
    }

    Ok(())
}

/// Takes the secret from the environment, or prompts for it.
fn share_secret(user: &str, no_input: bool) -> Result<String, CliError> {
    if let Ok(secret) = std::env::var(SECRET_ENV) {
        return Ok(secret);
    }
    if no_input {
        return SecretMissingSnafu.fail();
    }
    prompt::read_secret(user)
        .context(PromptSnafu)?
        .context(SecretMismatchSnafu)
}

fn describe_outcome(outcome: &ApplyOutcome) -> String {
    match outcome {
        ApplyOutcome::Unchanged => "unchanged".to_string(),
        ApplyOutcome::Committed { backup } => format!("updated (backup {})", backup.display()),
        ApplyOutcome::RolledBack { backup, reason } => {
            format!("rolled back from {} ({})", backup.display(), reason)
        }
    }
}

fn print_plan(plan: &SetupPlan) {
    println!(
        "Device {} ({}, UUID={})",
        plan.device.path.display(),
        plan.device.kind,
        plan.device.volume_id
    );
    if let Some(mountpoint) = &plan.device.mountpoint {
        if *mountpoint != plan.mount.target_path {
            println!("  will ask to unmount it from {}", mountpoint.display());
        }
    }

    println!("Mount table:");
    match &plan.table_plan {
        TablePlan::NoOp { line_index } => {
            println!("  line {} already matches", line_index + 1)
        }
        TablePlan::StripInvalidOptions {
            line_index,
            removed,
            replacement,
            ..
        } => {
            println!("  line {}: remove {}", line_index + 1, removed.join(","));
            println!("  + {}", replacement);
        }
        TablePlan::ReplaceLine {
            line_index,
            original,
            replacement,
            ..
        } => {
            println!("  line {} conflicts (will ask)", line_index + 1);
            println!("  - {}", original);
            println!("  + {}", replacement);
        }
        TablePlan::AppendLine { line } => println!("  + {}", line),
    }

    println!("Share config:");
    match &plan.share_plan {
        SharePlan::AppendOnly { .. } => println!("  append [{}]", plan.share.share_name),
        SharePlan::RemoveThenAppend { existing, .. } => println!(
            "  replace {} existing [{}] block(s) (will ask)",
            existing.len(),
            plan.share.share_name
        ),
    }
    for line in plan.share.to_block().lines() {
        println!("  + {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mountshare_core::Error;

    fn core(source: Error) -> CliError {
        CliError::Core { source }
    }

    #[test]
    fn test_exit_codes() {
        let aborted = core(Error::AbortedByUser {
            reason: "declined".to_string(),
        });
        assert_eq!(aborted.exit_code(), 3);

        let invalid = core(Error::InvalidInput {
            field: "share name".to_string(),
            message: "must not be empty".to_string(),
        });
        assert_eq!(invalid.exit_code(), 2);

        let not_block = core(Error::NotABlockDevice {
            path: PathBuf::from("/tmp/file"),
        });
        assert_eq!(not_block.exit_code(), 2);

        assert_eq!(CliError::SecretMissing.exit_code(), 2);
        assert_eq!(CliError::SecretMismatch.exit_code(), 2);

        let rejected = core(Error::ShareValidation {
            path: PathBuf::from("/etc/samba/smb.conf"),
            backup: PathBuf::from("/etc/samba/smb.conf.bak.20240309070501"),
            reason: "Unknown parameter".to_string(),
        });
        assert_eq!(rejected.exit_code(), 1);
    }

    #[test]
    fn test_table_content_errors_are_not_user_input() {
        let err = core(Error::FstabParse {
            line: "UUID=a /mnt/a".to_string(),
            message: "expected 4 to 6 fields, found 2".to_string(),
        });
        assert_eq!(err.exit_code(), 1);

        let err = core(Error::StoreChanged {
            path: PathBuf::from("/etc/fstab"),
        });
        assert_eq!(err.exit_code(), 1);
    }
}
