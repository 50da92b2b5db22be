//! The capability interface shared by both execution environments.

use vaultsync_core::{BackendKind, CommitId, PullOutcome, RemoteRef, RepositoryState};

use crate::error::BackendError;

/// The only remote a vault ever has.
pub const REMOTE_NAME: &str = "origin";

/// A local repository with a single remote.
///
/// Every method blocks for as long as a process spawn or network round trip
/// takes; callers on a latency-sensitive thread must move them onto a blocking
/// pool. Implementations re-read repository state on every call and hold no
/// cache between calls.
pub trait Backend: Send + Sync {
    /// Which environment this backend serves.
    fn kind(&self) -> BackendKind;

    /// Whether the backend root is a repository. A missing root is `Ok(false)`.
    fn is_repository(&self) -> Result<bool, BackendError>;

    /// Bootstrap a repository at the backend root wired to `remote_url`.
    ///
    /// Backends that cannot create repositories fail with
    /// [`BackendError::RepoUnavailable`].
    fn initialize(&self, remote_url: &str) -> Result<(), BackendError>;

    /// Working-tree cleanliness, tracking divergence and unmerged paths.
    fn status(&self) -> Result<RepositoryState, BackendError>;

    /// Stage every new, modified and deleted file.
    fn stage_all(&self) -> Result<(), BackendError>;

    /// Commit the index. Never creates an empty commit: fails with
    /// [`BackendError::NothingToCommit`] instead.
    fn commit(&self, message: &str) -> Result<CommitId, BackendError>;

    /// Point remote `name` at `url`, replacing any existing definition.
    fn set_remote(&self, name: &str, url: &str) -> Result<(), BackendError>;

    /// Fetch from `origin`. Doubles as a credential / URL probe.
    fn fetch(&self) -> Result<RemoteRef, BackendError>;

    /// Merge `origin/<branch>` into the current branch. Never rebases.
    fn pull(&self, branch: &str) -> Result<PullOutcome, BackendError>;

    /// Publish `branch` to `origin`. Never forces.
    fn push(&self, branch: &str, set_upstream: bool) -> Result<(), BackendError>;

    /// Track `origin/<branch>` from the local `branch`.
    fn set_upstream(&self, branch: &str) -> Result<(), BackendError>;

    /// Local HEAD commit, or `None` on an unborn branch.
    fn head(&self) -> Result<Option<CommitId>, BackendError>;
}
