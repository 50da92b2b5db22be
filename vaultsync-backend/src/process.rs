//! Bounded subprocess execution for the shell backend.
//!
//! At most `max` children run at once; each child gets a deadline after which
//! it is killed. Output is drained on reader threads so a chatty child can never
//! block on a full pipe while we poll for its exit.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{io_err, unavailable, BackendError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Counting semaphore over running subprocesses.
#[derive(Debug)]
pub(crate) struct ProcessPool {
    max: usize,
    running: Mutex<usize>,
    freed: Condvar,
}

struct Permit<'a> {
    pool: &'a ProcessPool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut running = self
            .pool
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        self.pool.freed.notify_one();
    }
}

impl ProcessPool {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            running: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        while *running >= self.max {
            running = self
                .freed
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *running += 1;
        Permit { pool: self }
    }

    /// Run `program args…` in `cwd` with `envs`, killing it after `deadline`.
    pub fn run(
        &self,
        program: &Path,
        args: &[&str],
        cwd: &Path,
        envs: &[(&str, String)],
        operation: &'static str,
        deadline: Duration,
    ) -> Result<ProcessOutput, BackendError> {
        let _permit = self.acquire();

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in envs {
            command.env(key, value);
        }

        tracing::debug!(program = %program.display(), ?args, "spawning");
        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                if cwd.exists() {
                    unavailable(cwd, format!("{} binary not found", program.display()))
                } else {
                    unavailable(cwd, "vault directory does not exist")
                }
            } else {
                io_err(PathBuf::from(program), err)
            }
        })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(operation, ?deadline, "killed subprocess past deadline");
                    return Err(BackendError::Timeout {
                        operation,
                        after: deadline,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => return Err(io_err(PathBuf::from(program), err)),
            }
        };

        Ok(ProcessOutput {
            status: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
