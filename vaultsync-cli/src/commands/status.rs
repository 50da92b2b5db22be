//! `vaultsync status`: fetch and compare heads without changing anything.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use vaultsync_backend::open_backend;
use vaultsync_core::{config, CommitId, SyncConfig};
use vaultsync_sync::{
    Divergence, Notifier, Orchestrator, RecordingNotifier, StatusCheck, StatusMonitor,
    StatusReport,
};

use crate::console::ConsoleNotifier;

/// Arguments for `vaultsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let mut settings = config::load_at(&home).context("failed to load settings")?;
        // Status is read-only: never let the check start a session.
        settings.auto_sync_on_startup = false;

        let backend = open_backend(&settings, &home).context("failed to open backend")?;
        let kind = backend.kind();
        let notifier: Arc<dyn Notifier> = if self.json {
            Arc::new(RecordingNotifier::new())
        } else {
            Arc::new(ConsoleNotifier)
        };
        let orchestrator = Arc::new(Orchestrator::for_config(backend, notifier, &settings));
        let check = StatusMonitor::new(orchestrator).check(&settings);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&check).context("failed to render status JSON")?
            );
            return Ok(());
        }

        match check {
            StatusCheck::Checked(report) => {
                print_table(&settings, &kind.to_string(), &report);
                Ok(())
            }
            StatusCheck::Unconfigured => {
                bail!("remote URL or token missing; run `vaultsync init` or edit the settings")
            }
            StatusCheck::NotInitialized => {
                println!(
                    "{} no repository yet; run `vaultsync sync` to create it",
                    "!".yellow().bold()
                );
                Ok(())
            }
            StatusCheck::Unreachable { error } => bail!("remote unreachable: {error}"),
            StatusCheck::Disabled => Ok(()),
        }
    }
}

fn print_table(settings: &SyncConfig, backend: &str, report: &StatusReport) {
    let rows = vec![
        StatusRow {
            field: "vault",
            value: settings.vault_path.display().to_string(),
        },
        StatusRow {
            field: "remote",
            value: settings.remote().to_string(),
        },
        StatusRow {
            field: "branch",
            value: settings.branch.clone(),
        },
        StatusRow {
            field: "backend",
            value: backend.to_string(),
        },
        StatusRow {
            field: "state",
            value: divergence_label(report.divergence),
        },
        StatusRow {
            field: "local head",
            value: short_or_dash(report.local_head.as_ref()),
        },
        StatusRow {
            field: "remote head",
            value: short_or_dash(report.remote_head.as_ref()),
        },
    ];

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn divergence_label(divergence: Divergence) -> String {
    match divergence {
        Divergence::UpToDate => "up to date".green().to_string(),
        Divergence::Behind { commits } => format!("{commits} behind").yellow().to_string(),
        Divergence::Ahead { commits } => format!("{commits} ahead").cyan().to_string(),
        Divergence::Diverged { ahead, behind } => {
            format!("{ahead} ahead, {behind} behind").red().to_string()
        }
    }
}

fn short_or_dash(commit: Option<&CommitId>) -> String {
    commit.map_or_else(|| "-".to_string(), |c| c.short().to_string())
}
