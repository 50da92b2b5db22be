//! Domain types shared by backends, the orchestrator and the status monitor.
//!
//! Everything here is a value snapshot. Repository state is derived fresh from
//! the backend on every query and is never cached across calls.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A commit object id, as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// First seven characters, the way `git log --oneline` prints ids.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(7);
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The execution environment a backend runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Full filesystem with a native `git` binary.
    Desktop,
    /// Embedded repository engine on a fixed logical root, token auth.
    Sandboxed,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Desktop => write!(f, "desktop"),
            BackendKind::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

/// Why a sync session or status check ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Required settings absent; no backend call was made.
    ConfigMissing,
    /// Not a repository, or the binary / embedded engine cannot be reached.
    RepoUnavailable,
    /// Bad URL or network failure.
    RemoteUnreachable,
    /// Unresolved overlapping changes after a pull.
    MergeConflict,
    /// Non-fast-forward push refused by the remote.
    PushRejected,
    /// Credentials refused by the remote.
    AuthFailed,
    /// A backend call exceeded its deadline.
    Timeout,
    /// Any other backend failure.
    Backend,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ConfigMissing => "config missing",
            FailureKind::RepoUnavailable => "repository unavailable",
            FailureKind::RemoteUnreachable => "remote unreachable",
            FailureKind::MergeConflict => "merge conflict",
            FailureKind::PushRejected => "push rejected",
            FailureKind::AuthFailed => "authentication failed",
            FailureKind::Timeout => "timed out",
            FailureKind::Backend => "backend error",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Snapshots and results
// ---------------------------------------------------------------------------

/// Working-tree and tracking state as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryState {
    pub is_clean: bool,
    /// Local commits not present on the tracked remote branch.
    pub ahead_count: usize,
    /// Remote commits not present locally.
    pub behind_count: usize,
    /// Unmerged paths, relative to the repository root, in backend order.
    #[serde(default)]
    pub conflicted_paths: Vec<PathBuf>,
}

impl RepositoryState {
    /// A clean tree with no divergence.
    pub fn clean() -> Self {
        Self {
            is_clean: true,
            ..Self::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicted_paths.is_empty()
    }
}

/// The remote-tracking ref observed by a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Short name, e.g. `origin/main`.
    pub name: String,
    /// `None` when the remote branch does not exist yet (empty remote).
    pub head: Option<CommitId>,
}

/// Set of paths left unmerged by a pull.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    pub paths: BTreeSet<PathBuf>,
}

impl ConflictReport {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Result of a merge-style pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PullOutcome {
    /// Up to date, fast-forwarded, or merged without conflicts.
    Merged {
        /// Number of files changed by the incoming history.
        changed: usize,
    },
    /// The merge stopped with unresolved paths; the merge state is left in place.
    Conflicted(ConflictReport),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
