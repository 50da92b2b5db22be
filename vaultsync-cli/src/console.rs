//! Colored stdout sink for sync events.

use std::path::Path;

use colored::Colorize;
use vaultsync_sync::{Notifier, SyncEvent};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: &SyncEvent) {
        let line = event.to_string();
        match event {
            SyncEvent::MergeConflict { .. } | SyncEvent::Behind { .. } | SyncEvent::Diverged { .. } => {
                println!("{} {}", "!".yellow().bold(), line.yellow())
            }
            e if e.is_problem() => println!("{} {}", "✗".red().bold(), line.red()),
            SyncEvent::Started { .. } => println!("{}", line.dimmed()),
            _ => println!("{} {}", "✓".green(), line),
        }
    }

    fn surface_conflict(&self, path: &Path) {
        println!("    {}", path.display().to_string().yellow());
    }
}
