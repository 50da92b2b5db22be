//! `vaultsync daemon`: background scheduler lifecycle and manual triggers.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Subcommand;
use serde_json::Value;

use vaultsync_daemon::paths::socket_path;
use vaultsync_daemon::{
    request_check, request_status, request_stop, request_sync, start_blocking, DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the daemon to run one sync session now.
    Sync,
    /// Ask the daemon to compare local and remote heads now.
    Check,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(mut status) => {
                annotate_times(&mut status);
                print_json(&status)?;
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Sync => {
            let attempt = request_sync(&home).context("daemon sync failed")?;
            print_json(&attempt)?;
        }
        DaemonCommand::Check => {
            let check = request_check(&home).context("daemon status check failed")?;
            print_json(&check)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}

/// Adds local-time renderings next to the unix timestamps.
fn annotate_times(status: &mut Value) {
    if let Some(at) = local_time(&status["started_at_unix"]) {
        status["started_at"] = Value::String(at);
    }
    if let Some(at) = local_time(&status["last_session"]["finished_at_unix"]) {
        status["last_session"]["finished_at"] = Value::String(at);
    }
}

fn local_time(secs: &Value) -> Option<String> {
    let secs = i64::try_from(secs.as_u64()?).ok()?;
    let at = DateTime::from_timestamp(secs, 0)?.with_timezone(&Local);
    Some(at.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn annotate_skips_missing_last_session() {
        let mut status = json!({ "started_at_unix": 0, "last_session": null });
        annotate_times(&mut status);
        assert!(status["started_at"].is_string());
        assert!(status["last_session"].is_null());
    }
}
