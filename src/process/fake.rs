//! Scripted interpreter for tests
//!
//! Understands a tiny line language instead of a real runtime:
//! `emit('text')` appends to the payload, `header('Name: value')` to the header file,
//! `print('text')` to the print file, and `fail('message')` logs `ERROR: message` and
//! exits with status 2. Every other line is ignored, so generated declarations pass through.
//!
//! Pre-warmed invocations (`-SYSIN ...`) follow the parking handshake: delete the
//! placeholder, wait for the program to reappear, run it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::runner::{ProcessOutcome, ProcessRunner, ProcessSpec};
use crate::error::{Error, Result};
use crate::session::{HEADERS_FILE, PRINT_FILE, WEBOUT_FILE};

/// What a pre-warmed invocation does before parking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Delete the placeholder and wait for a program
    Park,
    /// Never signal readiness; wait to be killed
    Stall,
    /// Exit with status 1 before parking
    ExitEarly,
}

pub struct FakeInterpreter {
    behavior: Behavior,
    spawned: AtomicUsize,
}

impl FakeInterpreter {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Park)
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        FakeInterpreter {
            behavior,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of processes "spawned" so far
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    async fn run_parked(
        &self,
        spec: &ProcessSpec,
        sysin: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<(Option<i32>, String, bool)> {
        match self.behavior {
            Behavior::ExitEarly => return Ok((Some(1), "license check failed".to_string(), false)),
            Behavior::Stall => {
                cancel.cancelled().await;
                return Ok((None, String::new(), true));
            }
            Behavior::Park => {}
        }

        tokio::fs::remove_file(&sysin).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok((None, String::new(), true)),
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
            if tokio::fs::try_exists(&sysin).await? {
                break;
            }
        }

        let log = flag_value(spec, "-LOG");
        let (code, stderr) = interpret(&spec.working_dir, &sysin, log.as_deref()).await?;
        Ok((Some(code), stderr, false))
    }
}

#[async_trait]
impl ProcessRunner for FakeInterpreter {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(&self, spec: ProcessSpec, cancel: CancellationToken) -> Result<ProcessOutcome> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let (exit_code, stderr, cancelled) = match flag_value(&spec, "-SYSIN") {
            Some(sysin) => self.run_parked(&spec, sysin, &cancel).await?,
            None => {
                let code = spec
                    .args
                    .last()
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::Process("no program argument".to_string()))?;
                let (exit, stderr) =
                    interpret(&spec.working_dir, &code, spec.log_file.as_deref()).await?;
                (Some(exit), stderr, false)
            }
        };

        Ok(ProcessOutcome {
            exit_code,
            stderr,
            duration: start.elapsed(),
            cancelled,
        })
    }
}

async fn interpret(dir: &Path, code: &Path, log_path: Option<&Path>) -> Result<(i32, String)> {
    let source = tokio::fs::read_to_string(code).await?;
    let mut log = format!("NOTE: fake interpreter running {}\n", code.display());
    let mut exit = 0;
    let mut stderr = String::new();

    for line in source.lines() {
        let line = line.trim().trim_end_matches(';');
        if let Some(text) = call(line, "emit") {
            append(&dir.join(WEBOUT_FILE), text).await?;
        } else if let Some(header) = call(line, "header") {
            append(&dir.join(HEADERS_FILE), &format!("{}\n", header)).await?;
        } else if let Some(text) = call(line, "print") {
            append(&dir.join(PRINT_FILE), &format!("{}\n", text)).await?;
        } else if let Some(message) = call(line, "fail") {
            log.push_str(&format!("ERROR: {}\n", message));
            stderr = message.to_string();
            exit = 2;
            break;
        }
    }
    log.push_str("NOTE: finished\n");

    if let Some(path) = log_path {
        append(path, &log).await?;
    }
    Ok((exit, stderr))
}

fn call<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?
        .strip_prefix("('")?
        .strip_suffix("')")
}

fn flag_value(spec: &ProcessSpec, flag: &str) -> Option<PathBuf> {
    let position = spec.args.iter().position(|arg| arg == flag)?;
    spec.args.get(position + 1).map(PathBuf::from)
}

async fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}
