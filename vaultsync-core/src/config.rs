//! Sync settings, persisted as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.vaultsync/
//!   config.yaml        (settings: mode 0600, holds the auth token)
//!   sandbox/vault/     (fixed logical root of the embedded backend)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The sync engine only ever reads a [`SyncConfig`] snapshot; it never writes
//! settings back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::types::BackendKind;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which backend to construct; `Auto` defers to the environment probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Desktop,
    Sandboxed,
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => write!(f, "auto"),
            BackendPreference::Desktop => write!(f, "desktop"),
            BackendPreference::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

/// A required setting that is absent for the selected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSetting {
    RemoteUrl,
    AuthToken,
}

impl fmt::Display for MissingSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingSetting::RemoteUrl => write!(f, "remote URL"),
            MissingSetting::AuthToken => write!(f, "auth token"),
        }
    }
}

/// Immutable settings snapshot handed to the sync engine per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Working directory synced by the desktop backend.
    pub vault_path: PathBuf,
    #[serde(default)]
    pub remote_url: String,
    /// Bearer token; only the sandboxed backend requires it.
    #[serde(default)]
    pub auth_token: String,
    /// A `git` binary, or a directory containing one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_path: Option<PathBuf>,
    /// Periodic sync interval; `0` (or a non-numeric value on disk) disables it.
    #[serde(default, deserialize_with = "lenient_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub auto_sync_on_startup: bool,
    #[serde(default = "default_true")]
    pub check_status_on_startup: bool,
    #[serde(default)]
    pub backend: BackendPreference,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Overrides the hostname in commit messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default = "default_timeout")]
    pub network_timeout_secs: u64,
    #[serde(default = "default_max_processes")]
    pub max_concurrent_processes: usize,
}

impl SyncConfig {
    /// Settings for `vault_path` with every optional field at its default.
    pub fn new(vault_path: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
        Self {
            vault_path: vault_path.into(),
            remote_url: remote_url.into(),
            auth_token: String::new(),
            git_path: None,
            interval_minutes: 0,
            auto_sync_on_startup: false,
            check_status_on_startup: true,
            backend: BackendPreference::Auto,
            branch: default_branch(),
            device_name: None,
            author_name: None,
            author_email: None,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            max_concurrent_processes: DEFAULT_MAX_CONCURRENT_PROCESSES,
        }
    }

    /// Trimmed remote URL.
    pub fn remote(&self) -> &str {
        self.remote_url.trim()
    }

    /// Trimmed auth token.
    pub fn token(&self) -> &str {
        self.auth_token.trim()
    }

    /// First required setting missing for a backend of `kind`, if any.
    pub fn missing_setting(&self, kind: BackendKind) -> Option<MissingSetting> {
        if self.remote().is_empty() {
            return Some(MissingSetting::RemoteUrl);
        }
        if kind == BackendKind::Sandboxed && self.token().is_empty() {
            return Some(MissingSetting::AuthToken);
        }
        None
    }

    /// Scheduler period, or `None` when periodic sync is disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_minutes >= 1).then(|| Duration::from_secs(self.interval_minutes * 60))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs.max(1))
    }

    /// Copy safe to print: the token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.auth_token.is_empty() {
            copy.auth_token = "********".to_string();
        }
        copy
    }
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_SECS
}

fn default_max_processes() -> usize {
    DEFAULT_MAX_CONCURRENT_PROCESSES
}

/// Accepts integers, floats and numeric strings; anything else disables the
/// scheduler instead of failing the whole settings load.
fn lenient_minutes<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    let minutes = match value {
        serde_yaml::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole_minutes)),
        serde_yaml::Value::String(s) => s.trim().parse::<f64>().ok().and_then(whole_minutes),
        _ => None,
    };
    Ok(minutes.unwrap_or(0))
}

fn whole_minutes(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 1.0).then(|| value.trunc() as u64)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.vaultsync/`
pub fn vaultsync_root(home: &Path) -> PathBuf {
    home.join(".vaultsync")
}

/// `<home>/.vaultsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    vaultsync_root(home).join("config.yaml")
}

/// Fixed logical root the sandboxed backend operates on.
pub fn sandbox_root_at(home: &Path) -> PathBuf {
    vaultsync_root(home).join("sandbox").join("vault")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.vaultsync/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save settings to `<home>/.vaultsync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    let root = vaultsync_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
