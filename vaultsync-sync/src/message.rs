//! Commit message and device naming.

use chrono::{DateTime, TimeZone};
use vaultsync_core::SyncConfig;

/// `strftime` pattern for the timestamp half of a commit message.
pub const COMMIT_TIME_FORMAT: &str = "%Y-%m-%d:%H:%M:%S";

const FALLBACK_DEVICE: &str = "vaultsync";

/// `<device> <YYYY-MM-DD:HH:MM:SS>` in the timestamp's own zone.
pub fn commit_message<Tz>(device: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{device} {}", at.format(COMMIT_TIME_FORMAT))
}

/// Configured device name, else the host name, else a fixed fallback.
pub fn device_name(config: &SyncConfig) -> String {
    config
        .device_name
        .as_deref()
        .and_then(non_empty)
        .or_else(host_name)
        .unwrap_or_else(|| FALLBACK_DEVICE.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn host_name() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().as_deref().and_then(non_empty))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .as_deref()
                .and_then(non_empty)
        })
}
