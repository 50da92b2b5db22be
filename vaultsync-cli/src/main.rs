//! vaultsync: keep a notes vault in sync with a git remote.
//!
//! # Usage
//!
//! ```text
//! vaultsync init <vault> --remote <url> [--token <t>] [--interval <min>] [--backend auto|desktop|sandboxed]
//! vaultsync sync [--json]
//! vaultsync status [--json]
//! vaultsync config show [--json]
//! vaultsync config set-interval <minutes>
//! vaultsync daemon start|stop|status|sync|check
//! ```

mod commands;
mod console;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, daemon::DaemonCommand, init::InitArgs, status::StatusArgs,
    sync::SyncArgs,
};
use vaultsync_core::BackendPreference;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "vaultsync",
    version,
    about = "Sync a notes vault with a git remote",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the settings file for a vault.
    Init(InitArgs),

    /// Run one commit, pull, push session now.
    Sync(SyncArgs),

    /// Compare the local branch with the remote.
    Status(StatusArgs),

    /// Inspect or change saved settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared backend argument
// ---------------------------------------------------------------------------

/// Lets clap parse a `BackendPreference` from CLI strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendArg(pub BackendPreference);

impl FromStr for BackendArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self(BackendPreference::Auto)),
            "desktop" => Ok(Self(BackendPreference::Desktop)),
            "sandboxed" => Ok(Self(BackendPreference::Sandboxed)),
            other => Err(format!(
                "unknown backend '{other}'; expected: auto, desktop, sandboxed"
            )),
        }
    }
}

impl fmt::Display for BackendArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<BackendArg> for BackendPreference {
    fn from(b: BackendArg) -> Self {
        b.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing();
    }

    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Backend chatter goes to stderr at `warn` unless `RUST_LOG` says otherwise.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
