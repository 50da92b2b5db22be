//! One sync attempt: its state-machine phase and the outcomes it went through.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;
use vaultsync_core::{BackendKind, CommitId, ConflictReport, FailureKind};

/// Where a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Staging,
    Committing,
    ConfiguringRemote,
    Fetching,
    Pulling,
    ConflictHandling,
    Pushing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one step of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Committed,
    NoChangesToCommit,
    PulledClean,
    ConflictDetected,
    PushedOk,
    PushSkipped,
    Failed(FailureReason),
}

impl Outcome {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::ConflictDetected)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::Committed => write!(f, "committed"),
            Outcome::NoChangesToCommit => write!(f, "no changes to commit"),
            Outcome::PulledClean => write!(f, "pulled"),
            Outcome::ConflictDetected => write!(f, "conflict detected"),
            Outcome::PushedOk => write!(f, "pushed"),
            Outcome::PushSkipped => write!(f, "push skipped"),
            Outcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Record of one orchestrator run. Lives only as long as the caller keeps it.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSession {
    pub backend_kind: BackendKind,
    pub started_at: DateTime<Local>,
    pub commit_message: Option<String>,
    pub commit: Option<CommitId>,
    /// Last entry of `trail`, or `Pending` before the first step completes.
    pub outcome: Outcome,
    pub trail: Vec<Outcome>,
    pub phase: Phase,
    pub conflicts: Option<ConflictReport>,
}

impl SyncSession {
    pub(crate) fn new(backend_kind: BackendKind) -> Self {
        Self {
            backend_kind,
            started_at: Local::now(),
            commit_message: None,
            commit: None,
            outcome: Outcome::Pending,
            trail: Vec::new(),
            phase: Phase::Idle,
            conflicts: None,
        }
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        self.trail.push(outcome.clone());
        self.outcome = outcome;
    }

    /// Ended without a failure or unresolved conflict.
    pub fn succeeded(&self) -> bool {
        !self.outcome.is_terminal_failure()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            Outcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// One-line summary for status output.
    pub fn summary(&self) -> String {
        let steps: Vec<String> = self.trail.iter().map(Outcome::to_string).collect();
        format!(
            "{} via {} backend: {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.backend_kind,
            steps.join(" → ")
        )
    }
}

/// What a trigger got back from the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "attempt", rename_all = "snake_case")]
pub enum SyncAttempt {
    Completed(SyncSession),
    /// Another session held the guard; nothing was run.
    AlreadyRunning,
}

impl SyncAttempt {
    pub fn session(&self) -> Option<&SyncSession> {
        match self {
            SyncAttempt::Completed(session) => Some(session),
            SyncAttempt::AlreadyRunning => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_to_trail_and_sets_outcome() {
        let mut session = SyncSession::new(BackendKind::Desktop);
        assert_eq!(session.outcome, Outcome::Pending);
        session.record(Outcome::NoChangesToCommit);
        session.record(Outcome::PulledClean);
        session.record(Outcome::PushSkipped);
        assert_eq!(session.outcome, Outcome::PushSkipped);
        assert_eq!(session.trail.len(), 3);
        assert!(session.succeeded());
        assert!(session.summary().ends_with("no changes to commit → pulled → push skipped"));
    }

    #[test]
    fn failure_is_exposed() {
        let mut session = SyncSession::new(BackendKind::Sandboxed);
        session.record(Outcome::Failed(FailureReason {
            kind: FailureKind::AuthFailed,
            message: "bad token".to_string(),
        }));
        assert!(!session.succeeded());
        assert_eq!(session.failure().map(|r| r.kind), Some(FailureKind::AuthFailed));
    }
}
