//! Session pool configuration types
//!
//! Sizing and timing for the per-runtime session pools.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Session pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Directory holding one folder per session
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Ready sessions kept ahead of demand, per runtime
    #[serde(default = "default_min_ready")]
    pub min_ready: usize,
    /// Lifetime of an unused session
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Subtracted from the lifetime so the reaper runs before the parked process gives up
    #[serde(default = "default_expiry_margin", with = "humantime_serde")]
    pub expiry_margin: Duration,
    /// Deadline extension applied when the reaper finds a session in use
    #[serde(default = "default_in_use_extension", with = "humantime_serde")]
    pub in_use_extension: Duration,
    /// Upper bound on waiting for a pre-warmed process to park
    #[serde(default = "default_park_timeout", with = "humantime_serde")]
    pub park_timeout: Duration,
    /// Interval between checks while waiting for a process to park
    #[serde(default = "default_park_poll_interval", with = "humantime_serde")]
    pub park_poll_interval: Duration,
    /// How long a parked process waits for its program before exiting on its own
    #[serde(default = "default_bootstrap_wait", with = "humantime_serde")]
    pub bootstrap_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            sessions_dir: default_sessions_dir(),
            min_ready: default_min_ready(),
            session_ttl: default_session_ttl(),
            expiry_margin: default_expiry_margin(),
            in_use_extension: default_in_use_extension(),
            park_timeout: default_park_timeout(),
            park_poll_interval: default_park_poll_interval(),
            bootstrap_wait: default_bootstrap_wait(),
        }
    }
}

impl PoolConfig {
    /// Time from creation until the reaper first looks at a session
    pub fn effective_ttl(&self) -> Duration {
        self.session_ttl.saturating_sub(self.expiry_margin)
    }
}

fn default_sessions_dir() -> PathBuf {
    crate::config::state_dir().join("sessions")
}

fn default_min_ready() -> usize {
    2
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_expiry_margin() -> Duration {
    Duration::from_secs(5)
}

fn default_in_use_extension() -> Duration {
    Duration::from_secs(10)
}

fn default_park_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_park_poll_interval() -> Duration {
    Duration::from_millis(25)
}

fn default_bootstrap_wait() -> Duration {
    Duration::from_secs(15 * 60)
}
