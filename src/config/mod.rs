//! Configuration module
//!
//! - types/mod.rs: Core configuration types (Config, ServerConfig, ...)
//! - types/pool.rs: Session pool sizing and timing
//! - types/runtime.rs: Runtime executables and inference priority
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, ExecutionConfig, LogConfig, LogFormat, ServerConfig};

// Re-export pool and runtime types
pub use types::pool::PoolConfig;
pub use types::runtime::{RuntimeBinary, RuntimesConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, state_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
