//! Error types for vaultsync-backend.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vaultsync_core::FailureKind;

/// All errors that can arise from backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Not a repository, or the binary / engine could not be reached.
    #[error("repository unavailable at {path}: {reason}")]
    RepoUnavailable { path: PathBuf, reason: String },

    /// Bad URL, DNS, TLS or connection failure.
    #[error("remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// Credentials refused by the remote.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Remote refused a non-fast-forward update.
    #[error("push rejected: {0}")]
    PushRejected(String),

    /// A commit was requested with nothing staged.
    #[error("nothing to commit")]
    NothingToCommit,

    /// The call exceeded its deadline; the subprocess or transfer was cancelled.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A `git` subprocess exited unsuccessfully.
    #[error("`{command}` failed (exit {}): {stderr}", exit_label(.status))]
    Command {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// An error from the embedded engine that has no better classification.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Map to the session failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::RepoUnavailable { .. } => FailureKind::RepoUnavailable,
            BackendError::RemoteUnreachable(_) => FailureKind::RemoteUnreachable,
            BackendError::AuthFailed(_) => FailureKind::AuthFailed,
            BackendError::PushRejected(_) => FailureKind::PushRejected,
            BackendError::Timeout { .. } => FailureKind::Timeout,
            BackendError::NothingToCommit
            | BackendError::Command { .. }
            | BackendError::Git(_)
            | BackendError::Io { .. } => FailureKind::Backend,
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Convenience constructor for [`BackendError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackendError {
    BackendError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`BackendError::RepoUnavailable`].
pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> BackendError {
    BackendError::RepoUnavailable {
        path: path.into(),
        reason: reason.into(),
    }
}
