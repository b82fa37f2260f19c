//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use super::types::runtime::RuntimeBinary;
use super::types::Config;
use crate::error::{Error, Result};
use crate::runtime::RuntimeKind;

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the highest
/// precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    // Server overrides
    if let Some(bind) = var("CODEPOOL_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = var("CODEPOOL_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }

    // Pool overrides
    if let Some(dir) = var("CODEPOOL_SESSIONS_DIR") {
        config.pool.sessions_dir = PathBuf::from(dir);
    }

    // Runtime overrides
    for (key, kind) in [
        ("CODEPOOL_SAS_PATH", RuntimeKind::Sas),
        ("CODEPOOL_JS_PATH", RuntimeKind::Js),
        ("CODEPOOL_PY_PATH", RuntimeKind::Py),
        ("CODEPOOL_R_PATH", RuntimeKind::R),
    ] {
        if let Some(path) = var(key) {
            let slot = config.runtimes.binary_mut(kind);
            match slot {
                Some(binary) => binary.path = PathBuf::from(path),
                None => *slot = Some(RuntimeBinary::new(path)),
            }
        }
    }
    if let Some(list) = var("CODEPOOL_RUNTIMES") {
        let priority: Vec<RuntimeKind> = list
            .split(',')
            .filter_map(|name| name.trim().parse().ok())
            .collect();
        if !priority.is_empty() {
            config.runtimes.priority = priority;
        }
    }

    // Execution overrides
    if let Some(root) = var("CODEPOOL_PROGRAMS_ROOT") {
        config.execution.programs_root = PathBuf::from(root);
    }
    if let Some(threshold) = var("CODEPOOL_DEBUG_THRESHOLD") {
        if let Ok(v) = threshold.parse() {
            config.execution.debug_threshold = v;
        }
    }

    // Log overrides
    if let Some(level) = var("CODEPOOL_LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = var("CODEPOOL_LOG_FORMAT") {
        if let Ok(v) = format.parse() {
            config.log.format = v;
        }
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
