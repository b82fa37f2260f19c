//! Common runner trait and types

use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeBinary;
use crate::error::Result;
use crate::session::SessionPaths;

/// One process invocation
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Executable to spawn
    pub executable: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// Working directory of the child
    pub working_dir: PathBuf,
    /// File that receives stdout/stderr as they arrive; `None` discards both
    pub log_file: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    /// Create a spec running `executable` inside `working_dir`
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        ProcessSpec {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            log_file: None,
            env: HashMap::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Stream output into `path`
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The parked pre-warmed process: placeholder source as input, bootstrap as startup hook.
    ///
    /// The runtime writes its own log and print files, so nothing is captured here.
    pub fn prewarmed(binary: &RuntimeBinary, paths: &SessionPaths) -> Self {
        ProcessSpec::new(&binary.path, &paths.dir)
            .with_args(&binary.args)
            .arg("-SYSIN")
            .arg(&paths.code)
            .arg("-LOG")
            .arg(&paths.log)
            .arg("-PRINT")
            .arg(&paths.print)
            .arg("-WORK")
            .arg(&paths.dir)
            .arg("-AUTOEXEC")
            .arg(&paths.bootstrap)
            .arg("-NOTERMINAL")
    }

    /// A light-runtime script run: the program file is the last argument
    pub fn script(binary: &RuntimeBinary, paths: &SessionPaths) -> Self {
        ProcessSpec::new(&binary.path, &paths.dir)
            .with_args(&binary.args)
            .arg(&paths.code)
            .with_log_file(&paths.log)
            .with_env("_WEBOUT", paths.webout.to_string_lossy())
    }
}

/// How a process ended
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code; `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Tail of the captured stderr
    pub stderr: String,
    /// Wall time from spawn to exit
    pub duration: Duration,
    /// The process was killed because its session was destroyed
    pub cancelled: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }

    /// Reason recorded on the session when the run did not succeed
    pub fn failure_reason(&self) -> Option<String> {
        if self.success() {
            return None;
        }
        let status = if self.cancelled {
            "process killed".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }
        };
        match self.stderr.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(last) => Some(format!("{}: {}", status, last.trim())),
            None => Some(status),
        }
    }
}

/// Spawns and supervises one runtime process
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runner name (for logging)
    fn name(&self) -> &str;

    /// Run to completion, or until `cancel` fires.
    ///
    /// `Err` only for infrastructure problems (the executable could not be spawned);
    /// an abnormal exit is an `Ok` outcome that is not [`ProcessOutcome::success`].
    async fn run(&self, spec: ProcessSpec, cancel: CancellationToken) -> Result<ProcessOutcome>;
}
