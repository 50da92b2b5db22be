//! The sync state machine.
//!
//! ```text
//! Idle → Staging → Committing → ConfiguringRemote → Fetching → Pulling
//!      → ConflictHandling | Pushing → Idle
//! ```
//!
//! A session always commits local work before touching the remote, never
//! pushes after a conflict, and never rolls back a commit. Backend errors do
//! not escape [`Orchestrator::run`]: each becomes a terminal [`Outcome`] plus
//! exactly one failure event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use vaultsync_backend::{Backend, BackendError, REMOTE_NAME};
use vaultsync_core::{FailureKind, PullOutcome, RepositoryState, SyncConfig};

use crate::event::{Notifier, SyncEvent};
use crate::message::{commit_message, device_name};
use crate::session::{FailureReason, Outcome, Phase, SyncAttempt, SyncSession};

/// Runs sync sessions against one backend, at most one at a time.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn Notifier>,
    device: String,
    active: AtomicBool,
}

/// Terminal outcome already recorded; unwind to `run`.
struct Halt;

/// Holds the session flag; clears it on drop, including on panic.
struct SessionGuard<'a>(&'a AtomicBool);

impl<'a> SessionGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionGuard(flag))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        notifier: Arc<dyn Notifier>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            notifier,
            device: device.into(),
            active: AtomicBool::new(false),
        }
    }

    /// Device name taken from `config` (or the host name).
    pub fn for_config(
        backend: Arc<dyn Backend>,
        notifier: Arc<dyn Notifier>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(backend, notifier, device_name(config))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Whether a session currently holds the guard.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run one session. Returns `AlreadyRunning` without any backend call if
    /// another session is in progress.
    pub fn run(&self, config: &SyncConfig) -> SyncAttempt {
        let Some(_guard) = SessionGuard::try_acquire(&self.active) else {
            tracing::debug!("sync requested while a session is active");
            self.notifier.notify(&SyncEvent::AlreadyRunning);
            return SyncAttempt::AlreadyRunning;
        };

        let kind = self.backend.kind();
        let mut session = SyncSession::new(kind);
        self.notifier.notify(&SyncEvent::Started { backend: kind });
        tracing::info!(backend = %kind, device = %self.device, "sync session started");

        // Every early exit has already recorded its outcome.
        let _ = self.drive(config, &mut session);

        session.enter(Phase::Idle);
        tracing::info!(outcome = %session.outcome, "sync session finished");
        SyncAttempt::Completed(session)
    }

    fn drive(&self, config: &SyncConfig, session: &mut SyncSession) -> Result<(), Halt> {
        if let Some(field) = config.missing_setting(session.backend_kind) {
            self.notifier.notify(&SyncEvent::ConfigMissing { field });
            return Err(self.halt(
                session,
                FailureKind::ConfigMissing,
                format!("{field} is not configured"),
            ));
        }

        self.ensure_repository(config, session)?;

        session.enter(Phase::Staging);
        let entry = self.checked(session, self.backend.status())?;
        let committed = self.commit_local_changes(session, &entry)?;

        self.connect_remote(config, session)?;
        self.pull(config, session)?;

        if entry.is_clean && !committed && entry.ahead_count == 0 {
            session.record(Outcome::PushSkipped);
            self.notifier.notify(&SyncEvent::NothingToPush);
            return Ok(());
        }
        self.push(config, session)
    }

    fn ensure_repository(&self, config: &SyncConfig, session: &mut SyncSession) -> Result<(), Halt> {
        let missing = match self.backend.is_repository() {
            Ok(true) => return Ok(()),
            Ok(false) => self.backend.initialize(config.remote()).err(),
            Err(err) => Some(err),
        };
        match missing {
            None => {
                self.notifier.notify(&SyncEvent::RepositoryInitialized {
                    url: config.remote().to_string(),
                });
                Ok(())
            }
            Some(err) => {
                let error = err.to_string();
                self.notifier.notify(&SyncEvent::RepositoryNotFound {
                    error: error.clone(),
                });
                Err(self.halt(session, FailureKind::RepoUnavailable, error))
            }
        }
    }

    /// Stage and commit a dirty tree. Returns whether a commit was made.
    fn commit_local_changes(
        &self,
        session: &mut SyncSession,
        entry: &RepositoryState,
    ) -> Result<bool, Halt> {
        if entry.is_clean {
            session.record(Outcome::NoChangesToCommit);
            self.notifier.notify(&SyncEvent::WorkingTreeClean);
            return Ok(false);
        }

        let staged = self.backend.stage_all();
        self.checked(session, staged)?;

        session.enter(Phase::Committing);
        let message = commit_message(&self.device, &Local::now());
        match self.backend.commit(&message) {
            Ok(commit) => {
                tracing::debug!(commit = %commit, "committed local changes");
                session.commit_message = Some(message.clone());
                session.commit = Some(commit.clone());
                session.record(Outcome::Committed);
                self.notifier
                    .notify(&SyncEvent::CommitCreated { message, commit });
                Ok(true)
            }
            // Status saw changes git does not track (e.g. only ignored paths).
            Err(BackendError::NothingToCommit) => {
                session.record(Outcome::NoChangesToCommit);
                self.notifier.notify(&SyncEvent::WorkingTreeClean);
                Ok(false)
            }
            Err(err) => Err(self.fail(session, err)),
        }
    }

    fn connect_remote(&self, config: &SyncConfig, session: &mut SyncSession) -> Result<(), Halt> {
        let url = config.remote();
        session.enter(Phase::ConfiguringRemote);
        let configured = self.backend.set_remote(REMOTE_NAME, url);
        self.checked(session, configured)?;

        session.enter(Phase::Fetching);
        match self.backend.fetch() {
            Ok(remote) => {
                tracing::debug!(remote = %remote.name, head = ?remote.head, "fetched");
                self.notifier.notify(&SyncEvent::RemoteSet {
                    url: url.to_string(),
                });
                Ok(())
            }
            Err(err) => {
                let error = err.to_string();
                self.notifier.notify(&SyncEvent::InvalidRemote {
                    url: url.to_string(),
                    error: error.clone(),
                });
                Err(self.halt(session, FailureKind::RemoteUnreachable, error))
            }
        }
    }

    fn pull(&self, config: &SyncConfig, session: &mut SyncSession) -> Result<(), Halt> {
        session.enter(Phase::Pulling);
        let pulled = self.backend.pull(&config.branch);
        match self.checked(session, pulled)? {
            PullOutcome::Merged { changed } => {
                session.record(Outcome::PulledClean);
                self.notifier.notify(&SyncEvent::Pulled { changes: changed });
                Ok(())
            }
            PullOutcome::Conflicted(report) => {
                session.enter(Phase::ConflictHandling);
                let paths: Vec<_> = report.paths.iter().cloned().collect();
                tracing::warn!(count = paths.len(), "pull stopped on conflicts");
                self.notifier.notify(&SyncEvent::MergeConflict {
                    paths: paths.clone(),
                });
                for path in &paths {
                    self.notifier.surface_conflict(path);
                }
                session.conflicts = Some(report);
                session.record(Outcome::ConflictDetected);
                Err(Halt)
            }
        }
    }

    fn push(&self, config: &SyncConfig, session: &mut SyncSession) -> Result<(), Halt> {
        session.enter(Phase::Pushing);
        match self.backend.push(&config.branch, true) {
            Ok(()) => {
                session.record(Outcome::PushedOk);
                self.notifier.notify(&SyncEvent::PushSucceeded {
                    branch: config.branch.clone(),
                    message: session.commit_message.clone(),
                });
                Ok(())
            }
            Err(err) => {
                let error = err.to_string();
                self.notifier.notify(&SyncEvent::PushFailed {
                    error: error.clone(),
                });
                Err(self.halt(session, err.kind(), error))
            }
        }
    }

    /// Pass `Ok` through; turn `Err` into a `Failed` event and outcome.
    fn checked<T>(&self, session: &mut SyncSession, result: Result<T, BackendError>) -> Result<T, Halt> {
        result.map_err(|err| self.fail(session, err))
    }

    fn fail(&self, session: &mut SyncSession, err: BackendError) -> Halt {
        let kind = err.kind();
        let error = err.to_string();
        self.notifier.notify(&SyncEvent::Failed {
            kind,
            error: error.clone(),
        });
        self.halt(session, kind, error)
    }

    fn halt(&self, session: &mut SyncSession, kind: FailureKind, message: String) -> Halt {
        tracing::warn!(%kind, phase = ?session.phase, %message, "sync session failed");
        session.record(Outcome::Failed(FailureReason { kind, message }));
        Halt
    }
}
