//! Sessions - one working directory plus lifecycle state per execution slot
//!
//! A session is produced by its runtime's [`SessionPool`], serves at most one execution,
//! and is destroyed afterwards (or by the lifecycle reaper if it is never used).
//!
//! State changes are published through a `watch` channel, so code that did not start the
//! session's process can still wait for it to finish without polling a field.

mod factory;
mod lifecycle;
mod pool;
mod rendezvous;

pub use factory::SessionFactory;
pub use lifecycle::arm_reaper;
pub use pool::{SessionPool, SessionPools};
pub use rendezvous::{publish_atomically, wait_for_removal, FileRendezvous, Rendezvous};

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::process::ProcessOutcome;
use crate::runtime::RuntimeKind;

/// Captured execution log
pub const LOG_FILE: &str = "log.log";
/// Primary payload written by the program
pub const WEBOUT_FILE: &str = "webout.txt";
/// `Name: value` response header lines
pub const HEADERS_FILE: &str = "headers.txt";
/// Secondary output of the pre-warmed runtime
pub const PRINT_FILE: &str = "print.lst";
/// Startup hook of the pre-warmed runtime
pub const BOOTSTRAP_FILE: &str = "autoexec.sas";

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Directory allocated, process (if any) not parked yet
    Pending,
    /// Waiting to be handed out
    Ready,
    /// Program handed over, not finished
    Running,
    /// Program finished normally
    Completed,
    /// Program or process ended abnormally
    Failed,
}

impl SessionState {
    /// Whether the session's program (or parked process) has ended
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Pending => "pending",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Files inside a session directory shared with the spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub code: PathBuf,
    pub log: PathBuf,
    pub webout: PathBuf,
    pub headers: PathBuf,
    pub print: PathBuf,
    pub bootstrap: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: PathBuf, runtime: RuntimeKind) -> Self {
        SessionPaths {
            code: dir.join(format!("code.{}", runtime.extension())),
            log: dir.join(LOG_FILE),
            webout: dir.join(WEBOUT_FILE),
            headers: dir.join(HEADERS_FILE),
            print: dir.join(PRINT_FILE),
            bootstrap: dir.join(BOOTSTRAP_FILE),
            dir,
        }
    }

    /// Location of an uploaded file stored under `stored_name`
    pub fn upload(&self, stored_name: &str) -> PathBuf {
        self.dir.join(stored_name)
    }
}

/// Point-in-time view of a session, safe to hand to callers
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub runtime: RuntimeKind,
    pub state: SessionState,
    pub in_use: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

struct SessionMeta {
    expires_at: DateTime<Utc>,
    in_use: bool,
    failure_reason: Option<String>,
}

/// One exclusive execution slot
pub struct Session {
    id: String,
    runtime: RuntimeKind,
    paths: SessionPaths,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    meta: Mutex<SessionMeta>,
    cancel: CancellationToken,
    retired: AtomicBool,
}

impl Session {
    /// Create a Pending session rooted at `dir`, expiring after `ttl`
    pub fn new(id: impl Into<String>, runtime: RuntimeKind, dir: PathBuf, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let (state, _) = watch::channel(SessionState::Pending);
        Session {
            id: id.into(),
            runtime,
            paths: SessionPaths::new(dir, runtime),
            created_at,
            state,
            meta: Mutex::new(SessionMeta {
                expires_at: created_at + to_delta(ttl),
                in_use: false,
                failure_reason: None,
            }),
            cancel: CancellationToken::new(),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn dir(&self) -> &Path {
        &self.paths.dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.meta().expires_at
    }

    pub fn in_use(&self) -> bool {
        self.meta().in_use
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.meta().failure_reason.clone()
    }

    pub fn set_in_use(&self, in_use: bool) {
        self.meta().in_use = in_use;
    }

    /// Time left before the reaper looks at this session
    pub fn time_to_expiry(&self) -> Duration {
        (self.expires_at() - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Push the deadline `by` past now, returning the new deadline
    pub fn extend_expiry(&self, by: Duration) -> DateTime<Utc> {
        let mut meta = self.meta();
        let candidate = Utc::now() + to_delta(by);
        if candidate > meta.expires_at {
            meta.expires_at = candidate;
        }
        meta.expires_at
    }

    /// Pending -> Ready
    pub fn mark_ready(&self) -> bool {
        self.transition(|s| *s == SessionState::Pending, SessionState::Ready)
    }

    /// Pending | Ready -> Running; false if the session already finished
    pub fn begin_run(&self) -> bool {
        self.transition(
            |s| matches!(s, SessionState::Pending | SessionState::Ready),
            SessionState::Running,
        )
    }

    /// Record a normal finish
    pub fn complete(&self) {
        self.transition(|s| !s.is_finished(), SessionState::Completed);
    }

    /// Record an abnormal finish
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(session = %self.id, %reason, "session failed");
        self.meta().failure_reason = Some(reason);
        self.state.send_replace(SessionState::Failed);
    }

    /// Record the outcome of the session's process
    pub fn settle(&self, outcome: Result<ProcessOutcome>) {
        match outcome {
            Ok(outcome) => match outcome.failure_reason() {
                None => self.complete(),
                Some(reason) => self.fail(reason),
            },
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Wait until the session's program (or parked process) has ended
    pub async fn wait_finished(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_finished()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Token cancelled when the session is destroyed
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Mark destroyed and stop the session's process; true only for the first call
    pub(crate) fn retire(&self) -> bool {
        if self.retired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Remove the working directory; missing directories are fine
    pub(crate) async fn remove_dir(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.paths.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the process and delete the directory. Destroying twice is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        if !self.retire() {
            return Ok(());
        }
        self.remove_dir().await?;
        debug!(session = %self.id, runtime = %self.runtime, "session destroyed");
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let meta = self.meta();
        SessionSnapshot {
            id: self.id.clone(),
            runtime: self.runtime,
            state: self.state(),
            in_use: meta.in_use,
            created_at: self.created_at,
            expires_at: meta.expires_at,
            failure_reason: meta.failure_reason.clone(),
        }
    }

    fn transition(&self, from: impl Fn(&SessionState) -> bool, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if from(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn meta(&self) -> MutexGuard<'_, SessionMeta> {
        self.meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .field("state", &self.state())
            .field("dir", &self.paths.dir)
            .finish()
    }
}

/// Session ids: creation time in milliseconds plus a random suffix
pub fn generate_session_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), random_suffix(8))
}

/// Random alphanumeric string of `len` characters
pub(crate) fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
