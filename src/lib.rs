//! # Codepool
//!
//! Runs user programs on interpreter runtimes with bounded latency.
//!
//! ## Features
//!
//! - **Session Pools:** Ready sessions kept ahead of demand, one pool per runtime
//! - **Pre-warmed Runtime:** Expensive runtimes are started early and handed their program later
//! - **Lifecycle Reaper:** Idle sessions are reclaimed, sessions in use are never interrupted
//! - **Program Assembly:** Caller context and uploaded files injected in each runtime's syntax
//! - **Deterministic Capture:** Payload, log, headers and print stream read back from the session

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod program;
pub mod runtime;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{ExecutionRequest, ExecutionResult, Orchestrator};
pub use runtime::RuntimeKind;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
