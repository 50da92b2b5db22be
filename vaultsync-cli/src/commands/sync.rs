//! `vaultsync sync`: run one session in this process.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use vaultsync_backend::open_backend;
use vaultsync_core::config;
use vaultsync_sync::{FanoutNotifier, Notifier, Orchestrator, SyncAttempt, TracingNotifier};

use crate::console::ConsoleNotifier;

/// Arguments for `vaultsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit the session as JSON instead of progress lines.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let settings = config::load_at(&home).context("failed to load settings")?;
        let backend = open_backend(&settings, &home).context("failed to open backend")?;

        let notifier: Arc<dyn Notifier> = if self.json {
            Arc::new(TracingNotifier)
        } else {
            Arc::new(
                FanoutNotifier::new()
                    .with(Arc::new(ConsoleNotifier))
                    .with(Arc::new(TracingNotifier)),
            )
        };
        let orchestrator = Orchestrator::for_config(backend, notifier, &settings);
        let attempt = orchestrator.run(&settings);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&attempt).context("failed to render session JSON")?
            );
        }

        match attempt {
            SyncAttempt::AlreadyRunning => Ok(()),
            SyncAttempt::Completed(session) => {
                if !self.json {
                    println!("{}", session.summary().dimmed());
                }
                if let Some(reason) = session.failure() {
                    bail!("sync failed: {reason}");
                }
                if !session.succeeded() {
                    bail!("sync stopped: resolve the conflicted files, then run sync again");
                }
                Ok(())
            }
        }
    }
}
