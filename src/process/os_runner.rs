//! OS process runner
//!
//! Spawns the runtime executable with tokio and streams stdout/stderr into the
//! session log as the bytes arrive.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::runner::{ProcessOutcome, ProcessRunner, ProcessSpec};
use crate::error::{Error, Result};

/// Bytes of stderr kept for the failure reason
const STDERR_TAIL: usize = 8 * 1024;

/// How long to wait for output pipes after the child exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runner backed by real OS processes
#[derive(Debug, Default, Clone)]
pub struct OsProcessRunner;

impl OsProcessRunner {
    pub fn new() -> Self {
        OsProcessRunner
    }
}

#[async_trait]
impl ProcessRunner for OsProcessRunner {
    fn name(&self) -> &str {
        "os"
    }

    async fn run(&self, spec: ProcessSpec, cancel: CancellationToken) -> Result<ProcessOutcome> {
        let log = match &spec.log_file {
            Some(path) => Some(open_log(path).await?),
            None => None,
        };

        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(if log.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            executable = %spec.executable.display(),
            working_dir = %spec.working_dir.display(),
            "Spawning runtime process"
        );

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            Error::Process(format!(
                "Failed to spawn {}: {}",
                spec.executable.display(),
                e
            ))
        })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let writer = log.map(|file| tokio::spawn(write_log(file, rx)));
        let stdout_pump = child.stdout.take().map(|out| tokio::spawn(pump(out, tx.clone())));
        let stderr_pump = child.stderr.take().map(|err| tokio::spawn(pump(err, tx.clone())));
        drop(tx);

        let (status, cancelled) = tokio::select! {
            status = child.wait() => (status, false),
            _ = cancel.cancelled() => {
                debug!(executable = %spec.executable.display(), "Killing runtime process");
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill runtime process: {}", e);
                }
                (child.wait().await, true)
            }
        };
        let status =
            status.map_err(|e| Error::Process(format!("Failed to wait for process: {}", e)))?;

        drain(stdout_pump).await;
        let stderr = drain(stderr_pump).await;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        let outcome = ProcessOutcome {
            exit_code: status.code(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration: start.elapsed(),
            cancelled,
        };
        debug!(
            exit_code = ?outcome.exit_code,
            cancelled,
            elapsed_ms = outcome.duration.as_millis() as u64,
            "Runtime process ended"
        );
        Ok(outcome)
    }
}

async fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::Process(format!("Failed to open log {}: {}", path.display(), e)))
}

/// Forward everything read from `reader` to the log sink, returning the last bytes seen
async fn pump<R>(mut reader: R, sink: mpsc::Sender<Vec<u8>>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut tail = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                tail.extend_from_slice(&chunk);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
                // No log file configured: the receiver is gone, keep draining
                let _ = sink.send(chunk).await;
            }
            Err(e) => {
                warn!("Failed to read process output: {}", e);
                break;
            }
        }
    }
    tail
}

async fn write_log(mut file: File, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = file.write_all(&chunk).await {
            warn!("Failed to write process log: {}", e);
            return;
        }
    }
    if let Err(e) = file.flush().await {
        warn!("Failed to flush process log: {}", e);
    }
}

/// Wait for a pump; a grandchild still holding the pipe must not block the caller
async fn drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            warn!("Output pump failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}
