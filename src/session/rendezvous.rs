//! File handshake with a parked pre-warmed process
//!
//! The process signals that it is parked by deleting its placeholder source file, and
//! picks up work when the source file reappears. The handshake sits behind
//! [`Rendezvous`] so pools and the orchestrator can be driven without a real runtime.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Handshake between the pool and a parked process
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Resolve once the process has consumed (deleted) `placeholder`
    async fn await_parked(&self, placeholder: &Path) -> Result<()>;

    /// Give the parked process its program by making `target` appear in one step
    async fn hand_over(&self, target: &Path, program: &str) -> Result<()>;
}

/// Placeholder-deletion / atomic-rename handshake
#[derive(Debug, Clone)]
pub struct FileRendezvous {
    park_timeout: Duration,
    poll_interval: Duration,
}

impl FileRendezvous {
    pub fn new(park_timeout: Duration, poll_interval: Duration) -> Self {
        FileRendezvous {
            park_timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.park_timeout, config.park_poll_interval)
    }
}

#[async_trait]
impl Rendezvous for FileRendezvous {
    async fn await_parked(&self, placeholder: &Path) -> Result<()> {
        let removed = wait_for_removal(placeholder, self.park_timeout, self.poll_interval)
            .await
            .map_err(|e| Error::SessionCreation(format!("Failed to watch placeholder: {}", e)))?;
        if !removed {
            return Err(Error::SessionCreation(format!(
                "Runtime did not park within {:?} ({} still present)",
                self.park_timeout,
                placeholder.display()
            )));
        }
        Ok(())
    }

    async fn hand_over(&self, target: &Path, program: &str) -> Result<()> {
        publish_atomically(target, program).await?;
        debug!(target = %target.display(), "Program handed to parked runtime");
        Ok(())
    }
}

/// Write `contents` next to `target`, then rename it into place.
///
/// A reader polling for `target` never sees a partially written file.
pub async fn publish_atomically(target: &Path, contents: &str) -> Result<()> {
    let staging = staging_path(target);
    tokio::fs::write(&staging, contents).await?;
    if let Err(e) = tokio::fs::rename(&staging, target).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}

/// Poll until `path` no longer exists.
///
/// Returns `Ok(false)` when `timeout` elapses first.
pub async fn wait_for_removal(
    path: &Path,
    timeout: Duration,
    interval: Duration,
) -> std::io::Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !tokio::fs::try_exists(path).await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}
