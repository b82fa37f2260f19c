//! Runtime process supervision
//!
//! - runner.rs: `ProcessRunner` trait, `ProcessSpec`, `ProcessOutcome`
//! - os_runner.rs: tokio-backed runner streaming output into the session log

mod os_runner;
mod runner;

#[cfg(test)]
pub(crate) mod fake;

pub use os_runner::OsProcessRunner;
pub use runner::{ProcessOutcome, ProcessRunner, ProcessSpec};
