//! In-memory backend with scripted outcomes and a call log.
//!
//! Built for exercising the sync engine without a repository: every call is
//! recorded, failures are injected per operation, and `status` can be held on
//! a gate to observe overlapping triggers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use vaultsync_core::{BackendKind, CommitId, ConflictReport, PullOutcome, RemoteRef, RepositoryState};

use crate::backend::{Backend, REMOTE_NAME};
use crate::error::{unavailable, BackendError};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    IsRepository,
    Initialize(String),
    Status,
    StageAll,
    Commit(String),
    SetRemote { name: String, url: String },
    Fetch,
    Pull(String),
    Push { branch: String, set_upstream: bool },
    SetUpstream(String),
    Head,
}

/// Failure class to inject into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    RepoUnavailable,
    RemoteUnreachable,
    AuthFailed,
    PushRejected,
    Timeout,
    Other,
}

impl ScriptedFailure {
    fn to_error(self, operation: &'static str) -> BackendError {
        match self {
            ScriptedFailure::RepoUnavailable => unavailable("/scripted", "not a git repository"),
            ScriptedFailure::RemoteUnreachable => {
                BackendError::RemoteUnreachable("could not resolve host".to_string())
            }
            ScriptedFailure::AuthFailed => {
                BackendError::AuthFailed("invalid username or password".to_string())
            }
            ScriptedFailure::PushRejected => {
                BackendError::PushRejected("non-fast-forward".to_string())
            }
            ScriptedFailure::Timeout => BackendError::Timeout {
                operation,
                after: Duration::from_secs(1),
            },
            ScriptedFailure::Other => BackendError::Command {
                command: format!("git {operation}"),
                status: Some(1),
                stderr: "scripted failure".to_string(),
            },
        }
    }
}

/// Result of the next `pull`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedPull {
    Clean(usize),
    Conflict(Vec<PathBuf>),
    Fail(ScriptedFailure),
}

#[derive(Debug, Default)]
struct State {
    repository: bool,
    dirty: bool,
    staged: bool,
    ahead: usize,
    behind: usize,
    conflicted: Vec<PathBuf>,
    commits: u64,
    head: Option<CommitId>,
    remote_head: Option<CommitId>,
    pulls: VecDeque<ScriptedPull>,
    fail_initialize: Option<ScriptedFailure>,
    fail_status: Option<ScriptedFailure>,
    fail_commit: Option<ScriptedFailure>,
    fail_fetch: Option<ScriptedFailure>,
    fail_push: Option<ScriptedFailure>,
    fail_upstream: Option<ScriptedFailure>,
    calls: Vec<Call>,
}

/// Scripted [`Backend`]; starts as an existing, clean, up-to-date repository.
#[derive(Debug)]
pub struct ScriptedBackend {
    kind: BackendKind,
    state: Mutex<State>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            state: Mutex::new(State {
                repository: true,
                ..State::default()
            }),
            gate: Mutex::new(None),
        }
    }

    pub fn without_repository(self) -> Self {
        self.lock().repository = false;
        self
    }

    /// Uncommitted changes in the working tree.
    pub fn dirty(self) -> Self {
        self.set_dirty();
        self
    }

    pub fn with_divergence(self, ahead: usize, behind: usize) -> Self {
        self.set_divergence(ahead, behind);
        self
    }

    pub fn with_head(self, head: &str, remote: Option<&str>) -> Self {
        {
            let mut state = self.lock();
            state.head = Some(CommitId::from(head));
            state.remote_head = remote.map(CommitId::from);
        }
        self
    }

    /// Queue the outcome of the next `pull`. Unqueued pulls merge cleanly.
    pub fn with_pull(self, pull: ScriptedPull) -> Self {
        self.lock().pulls.push_back(pull);
        self
    }

    pub fn fail_initialize(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_initialize = Some(failure);
        self
    }

    pub fn fail_status(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_status = Some(failure);
        self
    }

    pub fn fail_commit(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_commit = Some(failure);
        self
    }

    pub fn fail_fetch(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_fetch = Some(failure);
        self
    }

    pub fn fail_push(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_push = Some(failure);
        self
    }

    pub fn fail_upstream(self, failure: ScriptedFailure) -> Self {
        self.lock().fail_upstream = Some(failure);
        self
    }

    pub fn set_dirty(&self) {
        self.lock().dirty = true;
    }

    pub fn set_divergence(&self, ahead: usize, behind: usize) {
        let mut state = self.lock();
        state.ahead = ahead;
        state.behind = behind;
    }

    /// Hold the next `status` call. Returns a receiver signalled once `status`
    /// is entered and a sender that lets it continue.
    pub fn gate_status(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Commit(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().repository
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    fn wait_at_gate(&self) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
    }
}

impl Backend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_repository(&self) -> Result<bool, BackendError> {
        Ok(self.record(Call::IsRepository).repository)
    }

    fn initialize(&self, remote_url: &str) -> Result<(), BackendError> {
        let mut state = self.record(Call::Initialize(remote_url.to_string()));
        if let Some(failure) = state.fail_initialize {
            return Err(failure.to_error("init"));
        }
        state.repository = true;
        Ok(())
    }

    fn status(&self) -> Result<RepositoryState, BackendError> {
        drop(self.record(Call::Status));
        self.wait_at_gate();
        let state = self.lock();
        if let Some(failure) = state.fail_status {
            return Err(failure.to_error("status"));
        }
        Ok(RepositoryState {
            is_clean: !state.dirty && state.conflicted.is_empty(),
            ahead_count: state.ahead,
            behind_count: state.behind,
            conflicted_paths: state.conflicted.clone(),
        })
    }

    fn stage_all(&self) -> Result<(), BackendError> {
        let mut state = self.record(Call::StageAll);
        let resolved = !state.conflicted.is_empty();
        state.staged = state.dirty || resolved;
        state.conflicted.clear();
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitId, BackendError> {
        let mut state = self.record(Call::Commit(message.to_string()));
        if let Some(failure) = state.fail_commit {
            return Err(failure.to_error("commit"));
        }
        if !state.staged {
            return Err(BackendError::NothingToCommit);
        }
        state.commits += 1;
        let id = CommitId(format!("{:040x}", state.commits));
        state.dirty = false;
        state.staged = false;
        state.ahead += 1;
        state.head = Some(id.clone());
        Ok(id)
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), BackendError> {
        drop(self.record(Call::SetRemote {
            name: name.to_string(),
            url: url.to_string(),
        }));
        Ok(())
    }

    fn fetch(&self) -> Result<RemoteRef, BackendError> {
        let state = self.record(Call::Fetch);
        if let Some(failure) = state.fail_fetch {
            return Err(failure.to_error("fetch"));
        }
        Ok(RemoteRef {
            name: REMOTE_NAME.to_string(),
            head: state.remote_head.clone(),
        })
    }

    fn pull(&self, branch: &str) -> Result<PullOutcome, BackendError> {
        let mut state = self.record(Call::Pull(branch.to_string()));
        let behind = state.behind;
        match state.pulls.pop_front().unwrap_or(ScriptedPull::Clean(behind)) {
            ScriptedPull::Clean(changed) => {
                state.behind = 0;
                Ok(PullOutcome::Merged { changed })
            }
            ScriptedPull::Conflict(paths) => {
                state.conflicted = paths.clone();
                Ok(PullOutcome::Conflicted(ConflictReport::new(paths)))
            }
            ScriptedPull::Fail(failure) => Err(failure.to_error("pull")),
        }
    }

    fn push(&self, branch: &str, set_upstream: bool) -> Result<(), BackendError> {
        let mut state = self.record(Call::Push {
            branch: branch.to_string(),
            set_upstream,
        });
        if let Some(failure) = state.fail_push {
            return Err(failure.to_error("push"));
        }
        state.ahead = 0;
        state.remote_head = state.head.clone();
        Ok(())
    }

    fn set_upstream(&self, branch: &str) -> Result<(), BackendError> {
        let state = self.record(Call::SetUpstream(branch.to_string()));
        match state.fail_upstream {
            Some(failure) => Err(failure.to_error("branch")),
            None => Ok(()),
        }
    }

    fn head(&self) -> Result<Option<CommitId>, BackendError> {
        Ok(self.record(Call::Head).head.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_requires_staged_changes() {
        let backend = ScriptedBackend::new(BackendKind::Desktop);
        backend.stage_all().unwrap();
        assert!(matches!(backend.commit("m"), Err(BackendError::NothingToCommit)));

        let backend = ScriptedBackend::new(BackendKind::Desktop).dirty();
        backend.stage_all().unwrap();
        backend.commit("m").unwrap();
        let state = backend.status().unwrap();
        assert!(state.is_clean);
        assert_eq!(state.ahead_count, 1);
    }

    #[test]
    fn queued_conflict_surfaces_in_status() {
        let backend = ScriptedBackend::new(BackendKind::Sandboxed)
            .with_pull(ScriptedPull::Conflict(vec![PathBuf::from("a.md")]));
        let outcome = backend.pull("main").unwrap();
        assert!(matches!(outcome, PullOutcome::Conflicted(ref r) if r.len() == 1));
        assert!(backend.status().unwrap().has_conflicts());
        assert_eq!(backend.count(|c| matches!(c, Call::Pull(_))), 1);
    }
}
