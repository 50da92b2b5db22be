//! Status checks at startup and on demand.

use std::sync::Arc;

use vaultsync_backend::{Call, ScriptedBackend, ScriptedFailure};
use vaultsync_core::{BackendKind, SyncConfig};
use vaultsync_sync::{
    Divergence, Orchestrator, Outcome, RecordingNotifier, StatusCheck, StatusMonitor, StatusReport,
    SyncAttempt, SyncEvent,
};

fn config(auto_sync: bool) -> SyncConfig {
    let mut config = SyncConfig::new("/notes", "https://git.example.com/me/notes.git");
    config.auth_token = "ghp_token".to_string();
    config.auto_sync_on_startup = auto_sync;
    config
}

fn monitor(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<RecordingNotifier>, StatusMonitor) {
    let backend = Arc::new(backend);
    let notifier = Arc::new(RecordingNotifier::new());
    let orchestrator = Arc::new(Orchestrator::new(backend.clone(), notifier.clone(), "laptop"));
    (backend, notifier, StatusMonitor::new(orchestrator))
}

fn report(check: StatusCheck) -> StatusReport {
    match check {
        StatusCheck::Checked(report) => report,
        other => panic!("expected a report, got {other:?}"),
    }
}

fn mutating(call: &Call) -> bool {
    matches!(
        call,
        Call::Initialize(_)
            | Call::StageAll
            | Call::Commit(_)
            | Call::SetRemote { .. }
            | Call::Pull(_)
            | Call::Push { .. }
    )
}

#[test]
fn behind_without_auto_sync_only_notifies() {
    let backend = ScriptedBackend::new(BackendKind::Desktop).with_divergence(0, 3);
    let (backend, notifier, monitor) = monitor(backend);
    let report = report(monitor.check_on_startup(&config(false)));

    assert_eq!(report.divergence, Divergence::Behind { commits: 3 });
    assert!(report.triggered.is_none());
    assert_eq!(notifier.events(), vec![SyncEvent::Behind { commits: 3 }]);
    assert!(notifier.events()[0].to_string().contains("3 commit(s) behind"));
    assert_eq!(backend.count(mutating), 0);
    assert_eq!(backend.count(|c| *c == Call::Fetch), 1);
}

#[test]
fn behind_with_auto_sync_runs_exactly_one_session() {
    let backend = ScriptedBackend::new(BackendKind::Desktop).with_divergence(0, 2);
    let (backend, _notifier, monitor) = monitor(backend);
    let report = report(monitor.check_on_startup(&config(true)));

    let Some(SyncAttempt::Completed(session)) = report.triggered else {
        panic!("expected a triggered session");
    };
    assert!(session.trail.contains(&Outcome::PulledClean));
    assert_eq!(backend.count(|c| matches!(c, Call::Pull(_))), 1);
    assert_eq!(backend.count(|c| matches!(c, Call::SetRemote { .. })), 1);
}

#[test]
fn diverged_with_auto_sync_pushes_after_merge() {
    let backend = ScriptedBackend::new(BackendKind::Sandboxed).with_divergence(1, 1);
    let (backend, _notifier, monitor) = monitor(backend);
    let report = report(monitor.check(&config(true)));

    assert_eq!(report.divergence, Divergence::Diverged { ahead: 1, behind: 1 });
    let session = report.triggered.as_ref().and_then(SyncAttempt::session).expect("session");
    assert_eq!(session.outcome, Outcome::PushedOk);
    assert_eq!(backend.count(|c| matches!(c, Call::Push { .. })), 1);
}

#[test]
fn ahead_without_auto_sync_notifies_local_ahead() {
    let backend = ScriptedBackend::new(BackendKind::Desktop)
        .with_divergence(2, 0)
        .with_head("abc", Some("def"));
    let (_backend, notifier, monitor) = monitor(backend);
    let report = report(monitor.check(&config(false)));

    assert_eq!(report.local_head.map(|c| c.0), Some("abc".to_string()));
    assert_eq!(report.remote_head.map(|c| c.0), Some("def".to_string()));
    assert_eq!(notifier.events(), vec![SyncEvent::Ahead { commits: 2 }]);
}

#[test]
fn up_to_date_never_syncs() {
    let (backend, notifier, monitor) = monitor(ScriptedBackend::new(BackendKind::Desktop));
    let report = report(monitor.check(&config(true)));

    assert_eq!(report.divergence, Divergence::UpToDate);
    assert!(report.triggered.is_none());
    assert_eq!(notifier.categories(), vec!["up_to_date"]);
    assert_eq!(backend.count(mutating), 0);
}

#[test]
fn disabled_startup_check_makes_no_calls() {
    let (backend, _notifier, monitor) = monitor(ScriptedBackend::new(BackendKind::Desktop));
    let mut config = config(true);
    config.check_status_on_startup = false;

    assert!(matches!(monitor.check_on_startup(&config), StatusCheck::Disabled));
    assert!(backend.calls().is_empty());
}

#[test]
fn unconfigured_and_uninitialized_are_silent() {
    let (backend, notifier, monitor) = monitor(ScriptedBackend::new(BackendKind::Sandboxed));
    let mut unconfigured = config(true);
    unconfigured.auth_token.clear();
    assert!(matches!(monitor.check(&unconfigured), StatusCheck::Unconfigured));
    assert!(backend.calls().is_empty());
    assert!(notifier.events().is_empty());

    let (backend, notifier, monitor) = monitor_for_missing_repository();
    assert!(matches!(monitor.check(&config(true)), StatusCheck::NotInitialized));
    assert_eq!(backend.calls(), vec![Call::IsRepository]);
    assert!(notifier.events().is_empty());
}

fn monitor_for_missing_repository() -> (Arc<ScriptedBackend>, Arc<RecordingNotifier>, StatusMonitor) {
    monitor(ScriptedBackend::new(BackendKind::Desktop).without_repository())
}

#[test]
fn fetch_failure_is_logged_not_notified() {
    let backend = ScriptedBackend::new(BackendKind::Desktop)
        .with_divergence(0, 5)
        .fail_fetch(ScriptedFailure::RemoteUnreachable);
    let (_backend, notifier, monitor) = monitor(backend);

    assert!(matches!(monitor.check(&config(true)), StatusCheck::Unreachable { .. }));
    assert!(notifier.events().is_empty());
}

#[test]
fn upstream_binding_failure_is_ignored() {
    let backend = ScriptedBackend::new(BackendKind::Desktop)
        .with_divergence(0, 1)
        .fail_upstream(ScriptedFailure::Other);
    let (backend, _notifier, monitor) = monitor(backend);
    let report = report(monitor.check(&config(false)));

    assert_eq!(report.divergence, Divergence::Behind { commits: 1 });
    assert_eq!(backend.count(|c| matches!(c, Call::SetUpstream(_))), 1);
}
