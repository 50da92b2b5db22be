//! Notification events and the sinks that receive them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use vaultsync_core::{BackendKind, CommitId, FailureKind, MissingSetting};

/// Everything the engine reports to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Started { backend: BackendKind },
    WorkingTreeClean,
    CommitCreated { message: String, commit: CommitId },
    RemoteSet { url: String },
    InvalidRemote { url: String, error: String },
    Pulled { changes: usize },
    MergeConflict { paths: Vec<PathBuf> },
    PushSucceeded { branch: String, message: Option<String> },
    PushFailed { error: String },
    NothingToPush,
    RepositoryNotFound { error: String },
    RepositoryInitialized { url: String },
    Failed { kind: FailureKind, error: String },
    ConfigMissing { field: MissingSetting },
    AlreadyRunning,
    UpToDate,
    Behind { commits: usize },
    Ahead { commits: usize },
    Diverged { ahead: usize, behind: usize },
}

impl SyncEvent {
    /// Stable machine-readable name, one per variant.
    pub fn category(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "started",
            SyncEvent::WorkingTreeClean => "working_tree_clean",
            SyncEvent::CommitCreated { .. } => "commit_created",
            SyncEvent::RemoteSet { .. } => "remote_set",
            SyncEvent::InvalidRemote { .. } => "invalid_remote",
            SyncEvent::Pulled { .. } => "pulled",
            SyncEvent::MergeConflict { .. } => "merge_conflict",
            SyncEvent::PushSucceeded { .. } => "push_succeeded",
            SyncEvent::PushFailed { .. } => "push_failed",
            SyncEvent::NothingToPush => "nothing_to_push",
            SyncEvent::RepositoryNotFound { .. } => "repository_not_found",
            SyncEvent::RepositoryInitialized { .. } => "repository_initialized",
            SyncEvent::Failed { .. } => "failed",
            SyncEvent::ConfigMissing { .. } => "config_missing",
            SyncEvent::AlreadyRunning => "already_running",
            SyncEvent::UpToDate => "up_to_date",
            SyncEvent::Behind { .. } => "behind",
            SyncEvent::Ahead { .. } => "ahead",
            SyncEvent::Diverged { .. } => "diverged",
        }
    }

    /// Whether the event reports something the user has to act on.
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            SyncEvent::InvalidRemote { .. }
                | SyncEvent::MergeConflict { .. }
                | SyncEvent::PushFailed { .. }
                | SyncEvent::RepositoryNotFound { .. }
                | SyncEvent::Failed { .. }
                | SyncEvent::ConfigMissing { .. }
        )
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Started { backend } => write!(f, "Sync started ({backend})"),
            SyncEvent::WorkingTreeClean => write!(f, "Working tree clean, nothing to commit"),
            SyncEvent::CommitCreated { message, commit } => {
                write!(f, "Committed {}: {message}", commit.short())
            }
            SyncEvent::RemoteSet { url } => write!(f, "Remote set to {url}"),
            SyncEvent::InvalidRemote { url, error } => {
                write!(f, "Remote {url} is invalid or unreachable: {error}")
            }
            SyncEvent::Pulled { changes } => match changes {
                0 => write!(f, "Pulled from remote, no incoming changes"),
                1 => write!(f, "Pulled 1 changed file from remote"),
                n => write!(f, "Pulled {n} changed files from remote"),
            },
            SyncEvent::MergeConflict { paths } => {
                write!(f, "Merge conflicts in:")?;
                for path in paths {
                    write!(f, "\n\t{}", path.display())?;
                }
                write!(f, "\nResolve them and sync again")
            }
            SyncEvent::PushSucceeded { branch, message } => match message {
                Some(message) => write!(f, "Pushed {branch} to remote: {message}"),
                None => write!(f, "Pushed {branch} to remote"),
            },
            SyncEvent::PushFailed { error } => write!(f, "Push failed: {error}"),
            SyncEvent::NothingToPush => write!(f, "Nothing to push"),
            SyncEvent::RepositoryNotFound { error } => write!(f, "Repository not found: {error}"),
            SyncEvent::RepositoryInitialized { url } => {
                write!(f, "Initialized repository tracking {url}")
            }
            SyncEvent::Failed { kind, error } => write!(f, "Sync failed ({kind}): {error}"),
            SyncEvent::ConfigMissing { field } => {
                write!(f, "Sync skipped: {field} is not configured")
            }
            SyncEvent::AlreadyRunning => write!(f, "A sync is already running"),
            SyncEvent::UpToDate => write!(f, "Vault is up to date"),
            SyncEvent::Behind { commits } => {
                write!(f, "Your vault is {commits} commit(s) behind the remote")
            }
            SyncEvent::Ahead { commits } => {
                write!(f, "{commits} local commit(s) not yet pushed")
            }
            SyncEvent::Diverged { ahead, behind } => write!(
                f,
                "Local and remote have diverged ({ahead} ahead, {behind} behind)"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives events. Implementations must not block for long: they are called
/// inline from the sync thread.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &SyncEvent);

    /// Point the user at one conflicted file.
    fn surface_conflict(&self, _path: &Path) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &SyncEvent) {
        if event.is_problem() {
            tracing::warn!(category = event.category(), "{event}");
        } else {
            tracing::info!(category = event.category(), "{event}");
        }
    }

    fn surface_conflict(&self, path: &Path) {
        tracing::warn!(path = %path.display(), "conflicted file");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SyncEvent>>,
    conflicts: Mutex<Vec<PathBuf>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        self.events().iter().map(SyncEvent::category).collect()
    }

    /// Paths passed to `surface_conflict`, in call order.
    pub fn surfaced(&self) -> Vec<PathBuf> {
        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &SyncEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn surface_conflict(&self, path: &Path) {
        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
    }
}

/// Forwards to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, event: &SyncEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }

    fn surface_conflict(&self, path: &Path) {
        for sink in &self.sinks {
            sink.surface_conflict(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn every_variant() -> Vec<SyncEvent> {
        vec![
            SyncEvent::Started {
                backend: BackendKind::Desktop,
            },
            SyncEvent::WorkingTreeClean,
            SyncEvent::CommitCreated {
                message: "laptop 2024-01-01:00:00:00".into(),
                commit: CommitId::from("0123456789abcdef"),
            },
            SyncEvent::RemoteSet { url: "u".into() },
            SyncEvent::InvalidRemote {
                url: "u".into(),
                error: "e".into(),
            },
            SyncEvent::Pulled { changes: 2 },
            SyncEvent::MergeConflict { paths: vec![] },
            SyncEvent::PushSucceeded {
                branch: "main".into(),
                message: None,
            },
            SyncEvent::PushFailed { error: "e".into() },
            SyncEvent::NothingToPush,
            SyncEvent::RepositoryNotFound { error: "e".into() },
            SyncEvent::RepositoryInitialized { url: "u".into() },
            SyncEvent::Failed {
                kind: FailureKind::Backend,
                error: "e".into(),
            },
            SyncEvent::ConfigMissing {
                field: MissingSetting::RemoteUrl,
            },
            SyncEvent::AlreadyRunning,
            SyncEvent::UpToDate,
            SyncEvent::Behind { commits: 3 },
            SyncEvent::Ahead { commits: 1 },
            SyncEvent::Diverged {
                ahead: 1,
                behind: 2,
            },
        ]
    }

    #[test]
    fn categories_are_distinct() {
        let events = every_variant();
        let categories: HashSet<_> = events.iter().map(SyncEvent::category).collect();
        assert_eq!(categories.len(), events.len());
    }

    #[test]
    fn behind_notice_names_commit_count() {
        let text = SyncEvent::Behind { commits: 4 }.to_string();
        assert!(text.contains("4 commit(s) behind"), "{text}");
        assert_eq!(
            SyncEvent::Pulled { changes: 1 }.to_string(),
            "Pulled 1 changed file from remote"
        );
    }

    #[test]
    fn conflict_notice_lists_every_path() {
        let event = SyncEvent::MergeConflict {
            paths: vec![PathBuf::from("daily/today.md"), PathBuf::from("ideas.md")],
        };
        assert_eq!(
            event.to_string(),
            "Merge conflicts in:\n\tdaily/today.md\n\tideas.md\nResolve them and sync again"
        );
    }

    #[test]
    fn push_notice_carries_commit_message() {
        let pushed = SyncEvent::PushSucceeded {
            branch: "main".into(),
            message: Some("laptop 2024-01-01:00:00:00".into()),
        };
        assert_eq!(
            pushed.to_string(),
            "Pushed main to remote: laptop 2024-01-01:00:00:00"
        );
        let bare = SyncEvent::PushSucceeded {
            branch: "main".into(),
            message: None,
        };
        assert_eq!(bare.to_string(), "Pushed main to remote");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let first = Arc::new(RecordingNotifier::new());
        let second = Arc::new(RecordingNotifier::new());
        let fanout = FanoutNotifier::new().with(first.clone()).with(second.clone());
        fanout.notify(&SyncEvent::UpToDate);
        fanout.surface_conflict(Path::new("a.md"));
        assert_eq!(first.categories(), vec!["up_to_date"]);
        assert_eq!(second.surfaced(), vec![PathBuf::from("a.md")]);
    }
}
