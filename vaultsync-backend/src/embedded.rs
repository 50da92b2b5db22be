//! Sandboxed backend: libgit2 on a fixed logical root, no native binary.
//!
//! Network calls authenticate with the configured token as the username and
//! an empty password. The credential callback answers once per call, so a bad
//! token fails fast instead of looping. The deadline is enforced twice:
//! libgit2's socket connect and read timeouts catch a silent server, and the
//! progress callbacks cancel a transfer that is still moving past it.
//!
//! Pulls are merge-only: up-to-date, fast-forward, or a true merge commit.
//! Conflicts are read straight from the merge index and the merge state is
//! left in place; the next commit records `MERGE_HEAD` as its second parent.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use git2::{
    build::CheckoutBuilder, BranchType, Commit, Cred, ErrorClass, ErrorCode, FetchOptions,
    IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions,
    RepositoryState as GitState, ResetType, Signature, StatusOptions, Tree,
};
use vaultsync_core::{
    config::DEFAULT_NETWORK_TIMEOUT_SECS, BackendKind, CommitId, ConflictReport, PullOutcome,
    RemoteRef, RepositoryState,
};

use crate::backend::{Backend, REMOTE_NAME};
use crate::error::{io_err, unavailable, BackendError};

/// libgit2 backend rooted at a single directory.
pub struct EmbeddedBackend {
    root: PathBuf,
    token: String,
    branch: String,
    timeout: Duration,
    author: (String, String),
}

impl fmt::Debug for EmbeddedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedBackend")
            .field("root", &self.root)
            .field("branch", &self.branch)
            .field("timeout", &self.timeout)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

/// Per-call state shared with libgit2 callbacks.
struct TransferGuard {
    started: Instant,
    deadline: Duration,
    credential_requests: Cell<u32>,
    expired: Cell<bool>,
}

impl TransferGuard {
    fn new(deadline: Duration) -> Self {
        apply_socket_timeouts(deadline);
        Self {
            started: Instant::now(),
            deadline,
            credential_requests: Cell::new(0),
            expired: Cell::new(false),
        }
    }

    /// Marks the guard expired once the deadline has passed.
    fn check(&self) -> bool {
        let alive = self.started.elapsed() < self.deadline;
        if !alive {
            self.expired.set(true);
        }
        alive
    }

    fn timed_out(&self) -> bool {
        self.expired.get() || self.started.elapsed() >= self.deadline
    }
}

/// Timeout currently installed in libgit2's process-wide socket options.
static SOCKET_TIMEOUT: Mutex<Option<Duration>> = Mutex::new(None);

/// Install `deadline` as libgit2's server connect and read timeout.
fn apply_socket_timeouts(deadline: Duration) {
    let mut installed = SOCKET_TIMEOUT.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed == Some(deadline) {
        return;
    }
    let millis = i32::try_from(deadline.as_millis()).unwrap_or(i32::MAX).max(1);
    // SAFETY: both options are plain integers in libgit2's global settings.
    // Writers are serialized by `SOCKET_TIMEOUT`; a transfer already in
    // flight reads either the old or the new value.
    let applied = unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)
            .and_then(|()| git2::opts::set_server_timeout_in_milliseconds(millis))
    };
    match applied {
        Ok(()) => *installed = Some(deadline),
        Err(err) => tracing::warn!(%err, "could not set libgit2 socket timeouts"),
    }
}

impl EmbeddedBackend {
    pub fn new(root: impl Into<PathBuf>, token: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            token: token.into(),
            branch: branch.into(),
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            author: ("vaultsync".to_string(), "vaultsync@localhost".to_string()),
        }
    }

    /// Deadline applied to every network transfer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = (name.into(), email.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository, BackendError> {
        Repository::open(&self.root).map_err(|e| unavailable(&self.root, e.message()))
    }

    fn signature(&self) -> Result<Signature<'static>, BackendError> {
        Ok(Signature::now(&self.author.0, &self.author.1)?)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{REMOTE_NAME}/{}", self.branch)
    }

    fn local_ref(&self, branch: &str) -> String {
        format!("refs/heads/{branch}")
    }

    fn callbacks<'a>(&self, guard: &'a TransferGuard) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();
        let token = self.token.clone();
        callbacks.credentials(move |_url, _username, _allowed| {
            let requests = guard.credential_requests.get() + 1;
            guard.credential_requests.set(requests);
            if requests > 1 {
                return Err(git2::Error::from_str("credentials rejected by remote"));
            }
            Cred::userpass_plaintext(&token, "")
        });
        callbacks.transfer_progress(move |_progress| guard.check());
        callbacks.sideband_progress(move |_message| guard.check());
        callbacks.push_transfer_progress(move |_current, _total, _bytes| {
            guard.check();
        });
        callbacks.push_negotiation(move |_updates| {
            if guard.check() {
                Ok(())
            } else {
                Err(git2::Error::from_str("push deadline exceeded"))
            }
        });
        callbacks
    }

    fn classify_network(
        &self,
        operation: &'static str,
        guard: &TransferGuard,
        err: git2::Error,
    ) -> BackendError {
        if guard.timed_out() || err.message().contains("timed out") {
            return BackendError::Timeout {
                operation,
                after: guard.deadline,
            };
        }
        let message = err.message().to_string();
        if guard.credential_requests.get() > 1
            || err.code() == ErrorCode::Auth
            || message.contains("401")
            || message.contains("403")
        {
            return BackendError::AuthFailed(message);
        }
        if err.code() == ErrorCode::NotFastForward {
            return BackendError::PushRejected(message);
        }
        match err.class() {
            ErrorClass::Net
            | ErrorClass::Http
            | ErrorClass::Ssh
            | ErrorClass::Ssl
            | ErrorClass::Os
            | ErrorClass::Invalid => BackendError::RemoteUnreachable(message),
            // A fetch touches nothing local; whatever else failed was the remote.
            _ if operation == "fetch" || err.code() == ErrorCode::NotFound => {
                BackendError::RemoteUnreachable(message)
            }
            _ => BackendError::Git(err),
        }
    }

    fn fetch_into(&self, repo: &Repository) -> Result<Option<Oid>, BackendError> {
        let guard = TransferGuard::new(self.timeout);
        let mut remote = repo.find_remote(REMOTE_NAME).map_err(|e| {
            BackendError::RemoteUnreachable(format!(
                "remote '{REMOTE_NAME}' is not configured: {}",
                e.message()
            ))
        })?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks(&guard));
        let refspec = format!(
            "+refs/heads/{branch}:refs/remotes/{REMOTE_NAME}/{branch}",
            branch = self.branch
        );
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|e| self.classify_network("fetch", &guard, e))?;
        Ok(repo.refname_to_id(&self.tracking_ref()).ok())
    }

    fn replace_remote(&self, repo: &Repository, name: &str, url: &str) -> Result<(), BackendError> {
        if repo.find_remote(name).is_ok() {
            repo.remote_delete(name)?;
        } else {
            tracing::debug!(remote = name, "no existing remote to remove");
        }
        repo.remote(name, url)?;
        Ok(())
    }

    /// Point an unborn `main` at the remote tip without touching local files.
    fn adopt_remote_history(&self, repo: &Repository, tip: Oid) -> Result<(), BackendError> {
        let commit = repo.find_commit(tip)?;
        let local = self.local_ref(&self.branch);
        repo.reference(&local, tip, true, "vaultsync: adopt remote history")?;
        repo.set_head(&local)?;
        repo.reset(commit.as_object(), ResetType::Mixed, None)?;
        repo.checkout_head(Some(CheckoutBuilder::new().safe().recreate_missing(true)))?;
        tracing::info!(root = %self.root.display(), tip = %tip, "adopted remote history");
        Ok(())
    }

    fn divergence(&self, repo: &Repository) -> Result<(usize, usize), BackendError> {
        let local = repo.head().ok().and_then(|h| h.target());
        let remote = repo.refname_to_id(&self.tracking_ref()).ok();
        let counts = match (local, remote) {
            (Some(local), Some(remote)) => repo.graph_ahead_behind(local, remote)?,
            (Some(local), None) => (count_commits(repo, local)?, 0),
            (None, Some(remote)) => (0, count_commits(repo, remote)?),
            (None, None) => (0, 0),
        };
        Ok(counts)
    }

    fn bind_upstream(&self, repo: &Repository, branch: &str) -> Result<(), BackendError> {
        let mut local = repo.find_branch(branch, BranchType::Local)?;
        local.set_upstream(Some(&format!("{REMOTE_NAME}/{branch}")))?;
        Ok(())
    }
}

fn count_commits(repo: &Repository, tip: Oid) -> Result<usize, BackendError> {
    let mut walk = repo.revwalk()?;
    walk.push(tip)?;
    Ok(walk.count())
}

fn changed_files(repo: &Repository, old: Option<&Tree<'_>>, new: &Tree<'_>) -> Result<usize, BackendError> {
    let diff = repo.diff_tree_to_tree(old, Some(new), None)?;
    Ok(diff.deltas().count())
}

fn is_unborn(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

impl Backend for EmbeddedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sandboxed
    }

    fn is_repository(&self) -> Result<bool, BackendError> {
        if !self.root.exists() {
            return Ok(false);
        }
        match Repository::open(&self.root) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn initialize(&self, remote_url: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
        let mut options = RepositoryInitOptions::new();
        options.initial_head(&self.branch);
        let repo = Repository::init_opts(&self.root, &options)?;
        self.replace_remote(&repo, REMOTE_NAME, remote_url)?;
        tracing::info!(root = %self.root.display(), "initialized embedded repository");

        match self.fetch_into(&repo) {
            Ok(Some(tip)) => self.adopt_remote_history(&repo, tip),
            Ok(None) => {
                tracing::debug!(branch = %self.branch, "remote branch empty; starting new history");
                Ok(())
            }
            Err(err) => {
                // Without the remote's history a later pull would see unrelated
                // histories; start over on the next attempt instead.
                drop(repo);
                let git_dir = self.root.join(".git");
                std::fs::remove_dir_all(&git_dir).map_err(|e| io_err(&git_dir, e))?;
                Err(err)
            }
        }
    }

    fn status(&self) -> Result<RepositoryState, BackendError> {
        let repo = self.open()?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let mut state = RepositoryState::clean();
        {
            let statuses = repo.statuses(Some(&mut options))?;
            for entry in statuses.iter() {
                let status = entry.status();
                if status.is_empty() || status.is_ignored() {
                    continue;
                }
                state.is_clean = false;
                if status.is_conflicted() {
                    if let Some(path) = entry.path() {
                        state.conflicted_paths.push(PathBuf::from(path));
                    }
                }
            }
        }

        let (ahead, behind) = self.divergence(&repo)?;
        state.ahead_count = ahead;
        state.behind_count = behind;
        Ok(state)
    }

    fn stage_all(&self) -> Result<(), BackendError> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitId, BackendError> {
        let mut repo = self.open()?;

        let mut merge_heads = Vec::new();
        if repo.state() == GitState::Merge {
            repo.mergehead_foreach(|oid| {
                merge_heads.push(*oid);
                true
            })?;
        }

        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let head = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(err) if is_unborn(&err) => None,
            Err(err) => return Err(err.into()),
        };

        if merge_heads.is_empty() {
            let unchanged = match &head {
                Some(parent) => parent.tree_id() == tree_id,
                None => tree.is_empty(),
            };
            if unchanged {
                return Err(BackendError::NothingToCommit);
            }
        }

        let mut parents: Vec<Commit<'_>> = head.into_iter().collect();
        for oid in &merge_heads {
            parents.push(repo.find_commit(*oid)?);
        }
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

        let signature = self.signature()?;
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?;
        if !merge_heads.is_empty() {
            repo.cleanup_state()?;
        }
        tracing::debug!(commit = %oid, parents = parent_refs.len(), "created commit");
        Ok(CommitId(oid.to_string()))
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), BackendError> {
        let repo = self.open()?;
        self.replace_remote(&repo, name, url)
    }

    fn fetch(&self) -> Result<RemoteRef, BackendError> {
        let repo = self.open()?;
        let tip = self.fetch_into(&repo)?;
        Ok(RemoteRef {
            name: format!("{REMOTE_NAME}/{}", self.branch),
            head: tip.map(|oid| CommitId(oid.to_string())),
        })
    }

    fn pull(&self, branch: &str) -> Result<PullOutcome, BackendError> {
        let repo = self.open()?;
        let Some(tip) = self.fetch_into(&repo)? else {
            tracing::debug!(branch, "remote branch absent; nothing to pull");
            return Ok(PullOutcome::Merged { changed: 0 });
        };

        let theirs = repo.find_annotated_commit(tip)?;
        let (analysis, _preference) = repo.merge_analysis(&[&theirs])?;
        if analysis.is_up_to_date() {
            return Ok(PullOutcome::Merged { changed: 0 });
        }

        let incoming = repo.find_commit(tip)?;
        let incoming_tree = incoming.tree()?;

        if analysis.is_unborn() {
            let local = self.local_ref(branch);
            repo.reference(&local, tip, true, "vaultsync: pull into unborn branch")?;
            repo.set_head(&local)?;
            repo.checkout_head(Some(CheckoutBuilder::new().safe().recreate_missing(true)))?;
            let changed = changed_files(&repo, None, &incoming_tree)?;
            return Ok(PullOutcome::Merged { changed });
        }

        let ours = repo.head()?.peel_to_commit()?;
        let base = repo.merge_base(ours.id(), tip).map_err(|e| {
            BackendError::Git(git2::Error::from_str(&format!(
                "local and remote histories are unrelated: {}",
                e.message()
            )))
        })?;
        let base_tree = repo.find_commit(base)?.tree()?;
        let changed = changed_files(&repo, Some(&base_tree), &incoming_tree)?;

        if analysis.is_fast_forward() {
            repo.checkout_tree(incoming.as_object(), Some(CheckoutBuilder::new().safe()))?;
            repo.head()?
                .set_target(tip, "vaultsync: pull fast-forward")?;
            return Ok(PullOutcome::Merged { changed });
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        repo.merge(&[&theirs], None, Some(&mut checkout))?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let mut report = ConflictReport::default();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                    let path = String::from_utf8_lossy(&entry.path).into_owned();
                    report.paths.insert(PathBuf::from(path));
                }
            }
            tracing::info!(paths = report.len(), "merge stopped with conflicts");
            return Ok(PullOutcome::Conflicted(report));
        }

        let tree = repo.find_tree(index.write_tree()?)?;
        let signature = self.signature()?;
        let message = format!("Merge remote-tracking branch '{REMOTE_NAME}/{branch}'");
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &[&ours, &incoming],
        )?;
        repo.cleanup_state()?;
        Ok(PullOutcome::Merged { changed })
    }

    fn push(&self, branch: &str, set_upstream: bool) -> Result<(), BackendError> {
        let repo = self.open()?;
        let guard = TransferGuard::new(self.timeout);
        let mut remote = repo.find_remote(REMOTE_NAME).map_err(|e| {
            BackendError::RemoteUnreachable(format!(
                "remote '{REMOTE_NAME}' is not configured: {}",
                e.message()
            ))
        })?;
        let local = self.local_ref(branch);
        let refspec = format!("{local}:{local}");
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = self.callbacks(&guard);
            callbacks.push_update_reference(|_refname, status| {
                if let Some(message) = status {
                    *rejection.borrow_mut() = Some(message.to_string());
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| self.classify_network("push", &guard, e))?;
        }
        if let Some(message) = rejection.into_inner() {
            return Err(BackendError::PushRejected(message));
        }

        let pushed = repo.refname_to_id(&local)?;
        let tracking = format!("refs/remotes/{REMOTE_NAME}/{branch}");
        repo.reference(&tracking, pushed, true, "vaultsync: push")?;
        if set_upstream {
            self.bind_upstream(&repo, branch)?;
        }
        Ok(())
    }

    fn set_upstream(&self, branch: &str) -> Result<(), BackendError> {
        let repo = self.open()?;
        self.bind_upstream(&repo, branch)
    }

    fn head(&self) -> Result<Option<CommitId>, BackendError> {
        let repo = self.open()?;
        let head = match repo.head() {
            Ok(head) => Ok(head.target().map(|oid| CommitId(oid.to_string()))),
            Err(err) if is_unborn(&err) => Ok(None),
            Err(err) => Err(err.into()),
        };
        head
    }
}
