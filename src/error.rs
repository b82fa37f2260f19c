//! Error types for codepool

use thiserror::Error;

/// Result type alias using codepool's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for codepool
///
/// A program that runs and fails is not an error here: that outcome is recorded on the
/// session (`SessionState::Failed`) and travels back inside a normal `ExecutionResult`.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested program does not exist
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    /// Runtime unknown, not configured, or not derivable from the request
    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// Session directory or cold start failed
    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    /// Runtime executable could not be spawned or supervised
    #[error("Process error: {0}")]
    Process(String),

    /// No live session with the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ProgramNotFound(_)
                | Error::UnsupportedRuntime(_)
                | Error::InvalidInput(_)
                | Error::SessionNotFound(_)
        )
    }

    /// Short machine-readable label for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ProgramNotFound(_) => "program_not_found",
            Error::UnsupportedRuntime(_) => "unsupported_runtime",
            Error::SessionCreation(_) => "session_creation_failed",
            Error::Process(_) => "process_error",
            Error::SessionNotFound(_) => "session_not_found",
            Error::Config(_) => "config_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::Json(_) => "json_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::ProgramNotFound("a.sas".into()).is_client_error());
        assert!(Error::UnsupportedRuntime("cobol".into()).is_client_error());
        assert!(!Error::SessionCreation("disk full".into()).is_client_error());
        assert!(!Error::Io(std::io::Error::other("boom")).is_client_error());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::ProgramNotFound("x".into()).kind(), "program_not_found");
        assert_eq!(Error::SessionCreation("x".into()).kind(), "session_creation_failed");
    }
}
