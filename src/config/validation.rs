//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::time::Duration;

use super::types::Config;
use crate::runtime::RuntimeKind;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    // Validate runtime executables
    result = validate_runtime_config(config, result);

    // Validate pool sizing and timing
    result = validate_pool_config(config, result);

    result
}

fn validate_runtime_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let enabled = config.runtimes.enabled();

    if enabled.is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "runtimes",
                "No runtime configured. Every execution request will be rejected.",
            )
            .with_suggestion("Set CODEPOOL_PY_PATH (or another runtime path) or configure runtimes.<kind>.path"),
        );
    }

    for kind in RuntimeKind::ALL {
        let Some(binary) = config.runtimes.binary(kind) else {
            continue;
        };
        if which::which(&binary.path).is_err() {
            result = result.with_warning(
                ValidationIssue::new(
                    format!("runtimes.{}.path", kind),
                    format!("Executable not found: {}", binary.path.display()),
                )
                .with_suggestion("Install the runtime or point the path at its executable"),
            );
        }
    }

    for kind in &config.runtimes.priority {
        if !enabled.contains(kind) {
            result = result.with_warning(ValidationIssue::new(
                "runtimes.priority",
                format!("Runtime '{}' is listed in priority but not configured", kind),
            ));
        }
    }

    result
}

fn validate_pool_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let pool = &config.pool;

    if pool.session_ttl <= pool.expiry_margin {
        result = result.with_error(
            ValidationIssue::new(
                "pool.session_ttl",
                "Session lifetime must be longer than the expiry margin",
            )
            .with_suggestion("Increase pool.session_ttl or decrease pool.expiry_margin"),
        );
    }

    if pool.park_poll_interval == Duration::ZERO {
        result = result.with_error(
            ValidationIssue::new("pool.park_poll_interval", "Poll interval must be non-zero")
                .with_suggestion("Use a short interval such as \"25ms\""),
        );
    }

    if pool.in_use_extension == Duration::ZERO {
        result = result.with_error(ValidationIssue::new(
            "pool.in_use_extension",
            "Extension must be non-zero",
        ));
    }

    if pool.min_ready == 0 {
        result = result.with_warning(ValidationIssue::new(
            "pool.min_ready",
            "No sessions are kept warm; every request pays the cold start",
        ));
    }

    if config.runtimes.sas.is_some() && pool.bootstrap_wait <= pool.effective_ttl() {
        result = result.with_warning(
            ValidationIssue::new(
                "pool.bootstrap_wait",
                "Parked processes may exit before the reaper reclaims their session",
            )
            .with_suggestion("Keep pool.bootstrap_wait at least as long as pool.session_ttl"),
        );
    }

    result
}
