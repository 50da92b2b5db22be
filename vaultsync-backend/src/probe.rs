//! Environment probe: which backend this process can run.
//!
//! Desktop requires a resolvable `git` binary; anything else falls back to the
//! sandboxed engine rooted under `~/.vaultsync/sandbox/vault`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vaultsync_core::{config::sandbox_root_at, BackendKind, BackendPreference, SyncConfig};

use crate::backend::Backend;
use crate::embedded::EmbeddedBackend;
use crate::error::{unavailable, BackendError};
use crate::shell::ShellBackend;

const AUTHOR_DOMAIN: &str = "vaultsync.local";

/// Locate the `git` binary: `git_path` (a file, or a directory holding one),
/// then `PATH`.
pub fn resolve_git_binary(git_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(configured) = git_path {
        let candidate = if configured.is_dir() {
            configured.join(binary_name())
        } else {
            configured.to_path_buf()
        };
        if candidate.is_file() {
            return Some(candidate);
        }
        tracing::debug!(path = %configured.display(), "configured git path does not resolve");
    }
    which::which("git").ok()
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "git.exe"
    } else {
        "git"
    }
}

/// Backend kind for `config`: a forced preference wins, `auto` probes for git.
pub fn detect_kind(config: &SyncConfig) -> BackendKind {
    match config.backend {
        BackendPreference::Desktop => BackendKind::Desktop,
        BackendPreference::Sandboxed => BackendKind::Sandboxed,
        BackendPreference::Auto => {
            if resolve_git_binary(config.git_path.as_deref()).is_some() {
                BackendKind::Desktop
            } else {
                BackendKind::Sandboxed
            }
        }
    }
}

/// Construct the backend `config` selects. `home` anchors the sandbox root.
pub fn open_backend(config: &SyncConfig, home: &Path) -> Result<Arc<dyn Backend>, BackendError> {
    let kind = detect_kind(config);
    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Desktop => {
            let git = resolve_git_binary(config.git_path.as_deref())
                .ok_or_else(|| unavailable(&config.vault_path, "no git binary found"))?;
            let mut shell = ShellBackend::new(git, &config.vault_path, &config.branch)
                .with_timeout(config.network_timeout())
                .with_max_processes(config.max_concurrent_processes);
            if let (Some(name), Some(email)) = (&config.author_name, &config.author_email) {
                shell = shell.with_identity(name, email);
            }
            Arc::new(shell)
        }
        BackendKind::Sandboxed => {
            let (name, email) = embedded_author(config);
            Arc::new(
                EmbeddedBackend::new(sandbox_root_at(home), config.token(), &config.branch)
                    .with_timeout(config.network_timeout())
                    .with_author(name, email),
            )
        }
    };
    tracing::info!(%kind, "backend selected");
    Ok(backend)
}

fn embedded_author(config: &SyncConfig) -> (String, String) {
    let fallback = config
        .device_name
        .clone()
        .unwrap_or_else(|| "vaultsync".to_string());
    let name = config.author_name.clone().unwrap_or_else(|| fallback.clone());
    let email = config.author_email.clone().unwrap_or_else(|| {
        let local: String = fallback
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!("{local}@{AUTHOR_DOMAIN}")
    });
    (name, email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn forced_preference_skips_probe() {
        let mut config = SyncConfig::new("/notes", "https://h/r.git");
        config.backend = BackendPreference::Sandboxed;
        assert_eq!(detect_kind(&config), BackendKind::Sandboxed);
        config.backend = BackendPreference::Desktop;
        assert_eq!(detect_kind(&config), BackendKind::Desktop);
    }

    #[test]
    fn configured_directory_resolves_to_binary_inside() {
        let dir = TempDir::new().expect("tempdir");
        let git = dir.path().join(binary_name());
        std::fs::write(&git, "").expect("write");
        assert_eq!(resolve_git_binary(Some(dir.path())), Some(git.clone()));
        assert_eq!(resolve_git_binary(Some(&git)), Some(git));
    }

    #[test]
    fn sandboxed_backend_lives_under_home() {
        let home = TempDir::new().expect("tempdir");
        let mut config = SyncConfig::new("/notes", "https://h/r.git");
        config.backend = BackendPreference::Sandboxed;
        config.auth_token = "tok".to_string();
        let backend = open_backend(&config, home.path()).expect("open");
        assert_eq!(backend.kind(), BackendKind::Sandboxed);
        assert!(!backend.is_repository().expect("probe"));
    }

    #[test]
    fn embedded_author_falls_back_to_device_name() {
        let mut config = SyncConfig::new("/notes", "");
        config.device_name = Some("Jo's Phone".to_string());
        let (name, email) = embedded_author(&config);
        assert_eq!(name, "Jo's Phone");
        assert_eq!(email, "Jo-s-Phone@vaultsync.local");
    }
}
