//! `vaultsync init <vault> --remote <url> [...]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use vaultsync_core::{config, SyncConfig};

use super::super::BackendArg;

/// Write `~/.vaultsync/config.yaml` for a vault.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Vault directory synced by the desktop backend.
    pub vault: PathBuf,

    /// Remote repository URL.
    #[arg(long, short = 'r')]
    pub remote: String,

    /// Access token; required by the sandboxed backend.
    #[arg(long)]
    pub token: Option<String>,

    /// Periodic sync interval in minutes; 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub interval: u64,

    /// Backend to use: auto | desktop | sandboxed.
    #[arg(long, default_value = "auto")]
    pub backend: BackendArg,

    /// Branch to sync.
    #[arg(long, default_value = config::DEFAULT_BRANCH)]
    pub branch: String,

    /// Name used in commit messages instead of the host name.
    #[arg(long)]
    pub device: Option<String>,

    /// Path to a `git` binary or the directory holding one.
    #[arg(long)]
    pub git_path: Option<PathBuf>,

    /// Sync automatically when the daemon starts and the remote differs.
    #[arg(long)]
    pub auto_sync: bool,

    /// Skip the remote status check at daemon startup.
    #[arg(long)]
    pub no_startup_check: bool,

    /// Replace existing settings.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "settings already exist at {}; pass --force to replace them",
                path.display()
            );
        }

        let vault = if self.vault.exists() {
            self.vault
                .canonicalize()
                .with_context(|| format!("cannot resolve path '{}'", self.vault.display()))?
        } else {
            self.vault.clone()
        };

        let mut settings = SyncConfig::new(vault, self.remote.trim());
        settings.auth_token = self.token.unwrap_or_default();
        settings.interval_minutes = self.interval;
        settings.backend = self.backend.into();
        settings.branch = self.branch;
        settings.device_name = self.device;
        settings.git_path = self.git_path;
        settings.auto_sync_on_startup = self.auto_sync;
        settings.check_status_on_startup = !self.no_startup_check;

        let saved = config::save_at(&home, &settings).context("failed to save settings")?;
        println!("✓ Saved settings for '{}'", settings.vault_path.display());
        println!("  Written to: {}", saved.display());
        match settings.interval() {
            Some(_) => println!("  Periodic sync: every {} min", settings.interval_minutes),
            None => println!("  Periodic sync: disabled"),
        }
        Ok(())
    }
}
