//! Drives a served daemon over its Unix socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use vaultsync_backend::{Call, ScriptedBackend};
use vaultsync_core::{BackendKind, SyncConfig};
use vaultsync_daemon::paths::socket_path;
use vaultsync_daemon::{
    request_check, request_status, request_stop, request_sync, serve, DaemonError, Services,
};
use vaultsync_sync::{Orchestrator, RecordingNotifier};

const URL: &str = "https://git.example.com/me/notes.git";

fn raw_exchange(socket: &std::path::Path, line: &str) -> Value {
    let mut stream = UnixStream::connect(socket).expect("connect");
    stream.write_all(line.as_bytes()).expect("write");
    stream.write_all(b"\n").expect("newline");
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).expect("read");
    serde_json::from_str(reply.trim_end()).expect("reply json")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_sync_check_and_stop_over_socket() {
    let home = TempDir::new().expect("home");
    let backend = Arc::new(ScriptedBackend::new(BackendKind::Desktop).dirty());
    let orchestrator = Arc::new(Orchestrator::new(
        backend.clone(),
        Arc::new(RecordingNotifier::new()),
        "laptop",
    ));
    let config = SyncConfig::new(home.path().join("vault"), URL);
    let server = tokio::spawn(serve(
        home.path().to_path_buf(),
        Services::new(config, orchestrator),
    ));

    let home_path = home.path().to_path_buf();
    let (status, attempt, check, invalid) = tokio::task::spawn_blocking(move || {
        let status = request_status(&home_path)?;
        let attempt = request_sync(&home_path)?;
        let check = request_check(&home_path)?;
        let invalid = raw_exchange(&socket_path(&home_path), "not json");
        request_stop(&home_path)?;
        Ok::<_, DaemonError>((status, attempt, check, invalid))
    })
    .await
    .expect("client thread")
    .expect("client requests");

    assert_eq!(status["running"], json!(true));
    assert_eq!(status["backend"], json!("desktop"));
    assert_eq!(status["scheduler_period_secs"], Value::Null);

    assert_eq!(attempt["attempt"], json!("completed"));
    assert_eq!(attempt["outcome"]["outcome"], json!("pushed_ok"));
    assert_eq!(backend.count(|c| matches!(c, Call::Push { .. })), 1);

    assert_eq!(check["check"], json!("checked"));
    assert_eq!(check["divergence"]["state"], json!("up_to_date"));

    assert_eq!(invalid["ok"], json!(false));
    assert!(invalid["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("invalid request JSON")));

    server
        .await
        .expect("server task")
        .expect("daemon exits cleanly");
    assert!(!socket_path(home.path()).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_session_is_reported_in_status() {
    let home = TempDir::new().expect("home");
    let backend = Arc::new(ScriptedBackend::new(BackendKind::Sandboxed).with_divergence(0, 2));
    let orchestrator = Arc::new(Orchestrator::new(
        backend,
        Arc::new(RecordingNotifier::new()),
        "tablet",
    ));
    let mut config = SyncConfig::new(home.path().join("vault"), URL);
    config.auth_token = "ghp_token".to_string();
    config.check_status_on_startup = false;
    let server = tokio::spawn(serve(
        home.path().to_path_buf(),
        Services::new(config, orchestrator),
    ));

    let home_path = home.path().to_path_buf();
    let status = tokio::task::spawn_blocking(move || {
        request_status(&home_path)?;
        request_sync(&home_path)?;
        let status = request_status(&home_path)?;
        request_stop(&home_path)?;
        Ok::<_, DaemonError>(status)
    })
    .await
    .expect("client thread")
    .expect("client requests");

    let last = &status["last_session"];
    assert_eq!(last["source"], json!("socket"));
    assert_eq!(last["succeeded"], json!(true));
    assert_eq!(last["outcome"], json!("push skipped"));
    assert_eq!(status["session_running"], json!(false));

    server.await.expect("server task").expect("clean exit");
}
