use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use vaultsync_backend::open_backend;
use vaultsync_core::{config, SyncConfig};
use vaultsync_sync::{
    Notifier, Orchestrator, StatusCheck, StatusMonitor, SyncAttempt, TracingNotifier,
};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{Command, DaemonRequest, DaemonResponse};
use crate::scheduler::SyncScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Sync,
    Check,
    StartupCheck,
}

struct SyncJob {
    kind: JobKind,
    source: &'static str,
    respond_to: oneshot::Sender<Result<Value, String>>,
}

/// Outcome of the most recent session the daemon ran.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub source: String,
    pub finished_at_unix: u64,
    pub succeeded: bool,
    pub outcome: String,
    pub summary: String,
    pub duration_ms: u64,
}

/// Everything a daemon needs to serve: settings snapshot plus the engine.
pub struct Services {
    pub config: SyncConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub monitor: Arc<StatusMonitor>,
}

impl Services {
    /// Engine over the backend `config` selects, reporting through `tracing`.
    pub fn from_config(config: SyncConfig, home: &Path) -> Result<Self, DaemonError> {
        let backend = open_backend(&config, home)?;
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        let orchestrator = Arc::new(Orchestrator::for_config(backend, notifier, &config));
        Ok(Self::new(config, orchestrator))
    }

    pub fn new(config: SyncConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let monitor = Arc::new(StatusMonitor::new(orchestrator.clone()));
        Self {
            config,
            orchestrator,
            monitor,
        }
    }
}

struct DaemonState {
    services: Services,
    last_session: RwLock<Option<SessionSummary>>,
    started_at_unix: u64,
    scheduler_period_secs: Option<u64>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load settings, build the backend, and serve until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let settings = config::load_at(&home)?;
    let services = Services::from_config(settings, &home)?;
    serve(home, services).await
}

/// Serve `services`: startup check, scheduler, socket and signal handling.
pub async fn serve(home: PathBuf, services: Services) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = Arc::new(DaemonState {
        scheduler_period_secs: services.config.interval().map(|d| d.as_secs()),
        services,
        last_session: RwLock::new(None),
        started_at_unix: unix_seconds_now(),
    });
    tracing::info!(
        backend = %state.services.orchestrator.backend().kind(),
        vault = %state.services.config.vault_path.display(),
        "daemon starting",
    );

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let _scheduler = {
        let sync_tx = sync_tx.clone();
        SyncScheduler::start(state.services.config.interval_minutes, move || {
            let sync_tx = sync_tx.clone();
            async move {
                if let Err(err) = enqueue(&sync_tx, JobKind::Sync, "scheduler").await {
                    tracing::error!(error = %err, "scheduled sync failed");
                }
            }
        })
    };

    let startup_handle = {
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            match enqueue(&sync_tx, JobKind::StartupCheck, "startup").await {
                Ok(result) => tracing::debug!(%result, "startup status check finished"),
                Err(err) => tracing::warn!(error = %err, "startup status check failed"),
            }
            Ok::<(), DaemonError>(())
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = job_processor_task(state, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                state,
                sync_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };
    drop(sync_tx);

    let (startup_result, processor_result, socket_result, signal_result) =
        tokio::join!(startup_handle, processor_handle, socket_handle, signal_handle);

    handle_join("startup_check", startup_result)?;
    handle_join("job_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Jobs run concurrently; the orchestrator's session guard rejects overlaps.
async fn job_processor_task(
    state: Arc<DaemonState>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let state = state.clone();
                tokio::spawn(async move {
                    let outcome = execute_job(state, job.kind, job.source).await;
                    let _ = job.respond_to.send(outcome);
                });
            }
        }
    }
    Ok(())
}

async fn execute_job(
    state: Arc<DaemonState>,
    kind: JobKind,
    source: &'static str,
) -> Result<Value, String> {
    let started = Instant::now();
    let blocking_state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let services = &blocking_state.services;
        match kind {
            JobKind::Sync => Triggered::Sync(services.orchestrator.run(&services.config)),
            JobKind::Check => Triggered::Check(services.monitor.check(&services.config)),
            JobKind::StartupCheck => {
                Triggered::Check(services.monitor.check_on_startup(&services.config))
            }
        }
    })
    .await
    .map_err(|err| format!("{source} job join error: {err}"))?;

    let attempt = match &result {
        Triggered::Sync(attempt) => Some(attempt),
        Triggered::Check(StatusCheck::Checked(report)) => report.triggered.as_ref(),
        Triggered::Check(_) => None,
    };
    if let Some(SyncAttempt::Completed(session)) = attempt {
        let summary = SessionSummary {
            source: source.to_string(),
            finished_at_unix: unix_seconds_now(),
            succeeded: session.succeeded(),
            outcome: session.outcome.to_string(),
            summary: session.summary(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            source,
            outcome = %summary.outcome,
            duration_ms = summary.duration_ms,
            "sync session recorded",
        );
        *state.last_session.write().await = Some(summary);
    }

    let value = match result {
        Triggered::Sync(attempt) => serde_json::to_value(attempt),
        Triggered::Check(check) => serde_json::to_value(check),
    };
    value.map_err(|err| err.to_string())
}

enum Triggered {
    Sync(SyncAttempt),
    Check(StatusCheck),
}

async fn socket_server_task(
    home: PathBuf,
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let state = state.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, home, state, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd {
            Command::Status => DaemonResponse::ok(build_status_payload(&home, &state).await),
            Command::Sync => respond(enqueue(&sync_tx, JobKind::Sync, "socket").await),
            Command::Check => respond(enqueue(&sync_tx, JobKind::Check, "socket").await),
            Command::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == Command::Stop {
            break;
        }
    }

    Ok(())
}

fn respond(result: Result<Value, DaemonError>) -> DaemonResponse {
    match result {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn build_status_payload(home: &Path, state: &DaemonState) -> Value {
    let last_session = state.last_session.read().await.clone();
    let services = &state.services;
    json!({
        "running": true,
        "backend": services.orchestrator.backend().kind(),
        "vault": services.config.vault_path.display().to_string(),
        "branch": services.config.branch,
        "interval_minutes": services.config.interval_minutes,
        "scheduler_period_secs": state.scheduler_period_secs,
        "session_running": services.orchestrator.is_running(),
        "started_at_unix": state.started_at_unix,
        "last_session": last_session,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn enqueue(
    sync_tx: &mpsc::Sender<SyncJob>,
    kind: JobKind,
    source: &'static str,
) -> Result<Value, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            kind,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = config::vaultsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filter, default `info`; `VAULTSYNC_LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("VAULTSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vaultsync_backend::{Call, ScriptedBackend};
    use vaultsync_core::BackendKind;
    use vaultsync_sync::RecordingNotifier;

    fn state_with(backend: Arc<ScriptedBackend>, interval_minutes: u64) -> Arc<DaemonState> {
        let mut config = SyncConfig::new("/notes", "https://git.example.com/me/notes.git");
        config.interval_minutes = interval_minutes;
        let orchestrator = Arc::new(Orchestrator::new(
            backend,
            Arc::new(RecordingNotifier::new()),
            "laptop",
        ));
        let services = Services::new(config, orchestrator);
        Arc::new(DaemonState {
            scheduler_period_secs: services.config.interval().map(|d| d.as_secs()),
            services,
            last_session: RwLock::new(None),
            started_at_unix: 1_000_000,
        })
    }

    #[tokio::test]
    async fn status_payload_before_any_session() {
        let home = TempDir::new().expect("home");
        let state = state_with(Arc::new(ScriptedBackend::new(BackendKind::Desktop)), 0);
        let payload = build_status_payload(home.path(), &state).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["backend"], json!("desktop"));
        assert_eq!(payload["scheduler_period_secs"], Value::Null);
        assert_eq!(payload["session_running"], json!(false));
        assert_eq!(payload["last_session"], Value::Null);
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
    }

    #[tokio::test]
    async fn sync_job_records_last_session() {
        let backend = Arc::new(ScriptedBackend::new(BackendKind::Desktop).dirty());
        let state = state_with(backend.clone(), 15);

        let value = execute_job(state.clone(), JobKind::Sync, "socket").await.expect("job");
        assert_eq!(value["attempt"], json!("completed"));
        assert_eq!(value["outcome"]["outcome"], json!("pushed_ok"));
        assert_eq!(backend.count(|c| matches!(c, Call::Push { .. })), 1);

        let last = state.last_session.read().await.clone().expect("summary");
        assert_eq!(last.source, "socket");
        assert!(last.succeeded);
        assert_eq!(last.outcome, "pushed");

        let payload = build_status_payload(Path::new("/tmp"), &state).await;
        assert_eq!(payload["scheduler_period_secs"], json!(900));
        assert_eq!(payload["last_session"]["outcome"], json!("pushed"));
    }

    #[tokio::test]
    async fn check_job_without_divergence_records_nothing() {
        let state = state_with(Arc::new(ScriptedBackend::new(BackendKind::Desktop)), 0);
        let value = execute_job(state.clone(), JobKind::Check, "socket").await.expect("job");
        assert_eq!(value["check"], json!("checked"));
        assert_eq!(value["divergence"]["state"], json!("up_to_date"));
        assert!(state.last_session.read().await.is_none());
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, "").expect("stale file");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}
