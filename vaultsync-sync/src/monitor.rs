//! Compare local and remote heads and decide whether to notify or sync.
//!
//! The monitor only fetches and binds upstream; it never stages, commits,
//! pulls or pushes on its own. Mutations happen only through an
//! [`Orchestrator`] session, and only when auto-sync is enabled.

use std::sync::Arc;

use serde::Serialize;
use vaultsync_backend::BackendError;
use vaultsync_core::{CommitId, SyncConfig};

use crate::event::SyncEvent;
use crate::orchestrator::Orchestrator;
use crate::session::SyncAttempt;

/// Relationship between the local branch and `origin/<branch>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Divergence {
    UpToDate,
    Behind { commits: usize },
    Ahead { commits: usize },
    Diverged { ahead: usize, behind: usize },
}

impl Divergence {
    pub fn classify(ahead: usize, behind: usize) -> Self {
        match (ahead, behind) {
            (0, 0) => Divergence::UpToDate,
            (0, behind) => Divergence::Behind { commits: behind },
            (ahead, 0) => Divergence::Ahead { commits: ahead },
            (ahead, behind) => Divergence::Diverged { ahead, behind },
        }
    }

    fn event(self) -> SyncEvent {
        match self {
            Divergence::UpToDate => SyncEvent::UpToDate,
            Divergence::Behind { commits } => SyncEvent::Behind { commits },
            Divergence::Ahead { commits } => SyncEvent::Ahead { commits },
            Divergence::Diverged { ahead, behind } => SyncEvent::Diverged { ahead, behind },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub divergence: Divergence,
    pub local_head: Option<CommitId>,
    pub remote_head: Option<CommitId>,
    /// The session auto-sync started, if any.
    pub triggered: Option<SyncAttempt>,
}

/// Result of a status check.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum StatusCheck {
    /// Startup checks are switched off.
    Disabled,
    /// Remote URL or token not set.
    Unconfigured,
    /// No repository at the backend root yet.
    NotInitialized,
    /// A backend call failed; logged, never surfaced as an event.
    Unreachable { error: String },
    Checked(StatusReport),
}

pub struct StatusMonitor {
    orchestrator: Arc<Orchestrator>,
}

impl StatusMonitor {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The startup hook: a no-op unless `check_status_on_startup` is set.
    pub fn check_on_startup(&self, config: &SyncConfig) -> StatusCheck {
        if !config.check_status_on_startup {
            tracing::debug!("startup status check disabled");
            return StatusCheck::Disabled;
        }
        self.check(config)
    }

    /// Fetch, compare heads, then notify or (with auto-sync) run a session.
    pub fn check(&self, config: &SyncConfig) -> StatusCheck {
        let backend = self.orchestrator.backend();
        if let Some(field) = config.missing_setting(backend.kind()) {
            tracing::debug!(%field, "status check skipped: not configured");
            return StatusCheck::Unconfigured;
        }

        match backend.is_repository() {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("status check skipped: no repository yet");
                return StatusCheck::NotInitialized;
            }
            Err(err) => return failed_check(err),
        }

        let remote = match backend.fetch() {
            Ok(remote) => remote,
            Err(err) => return failed_check(err),
        };
        if let Err(err) = backend.set_upstream(&config.branch) {
            tracing::debug!(%err, branch = %config.branch, "could not bind upstream");
        }

        let state = match backend.status() {
            Ok(state) => state,
            Err(err) => return failed_check(err),
        };
        let local_head = match backend.head() {
            Ok(head) => head,
            Err(err) => return failed_check(err),
        };

        let divergence = Divergence::classify(state.ahead_count, state.behind_count);
        tracing::info!(?divergence, "status checked");

        let triggered = if divergence != Divergence::UpToDate && config.auto_sync_on_startup {
            tracing::info!(?divergence, "auto-sync triggered by status check");
            Some(self.orchestrator.run(config))
        } else {
            self.orchestrator.notifier().notify(&divergence.event());
            None
        };

        StatusCheck::Checked(StatusReport {
            divergence,
            local_head,
            remote_head: remote.head,
            triggered,
        })
    }
}

fn failed_check(err: BackendError) -> StatusCheck {
    tracing::debug!(%err, "status check failed");
    StatusCheck::Unreachable {
        error: err.to_string(),
    }
}
