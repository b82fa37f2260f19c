//! Execution request types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::program::ProgramSource;
use crate::runtime::RuntimeKind;

/// Already-authenticated identity of the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub server_url: String,
    /// Request headers passed through to the program, in arrival order
    #[serde(default)]
    pub forwarded_headers: Vec<(String, String)>,
}

/// A file stored in the session directory before execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// File name inside the session directory
    pub stored_name: String,
    /// File name the client sent
    pub original_name: String,
    /// Multipart field the file came from
    pub field_name: String,
}

/// One program execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub program: ProgramSource,
    /// Explicit runtime; inferred from the program path when absent
    #[serde(default)]
    pub runtime: Option<RuntimeKind>,
    #[serde(default)]
    pub caller: CallerContext,
    /// Variables injected as declarations, in order
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,
    /// Per-caller bootstrap code (pre-warmed runtime only)
    #[serde(default)]
    pub preamble: Option<String>,
}

impl ExecutionRequest {
    pub fn new(program: ProgramSource) -> Self {
        ExecutionRequest {
            program,
            runtime: None,
            caller: CallerContext::default(),
            variables: IndexMap::new(),
            uploaded_files: Vec::new(),
            preamble: None,
        }
    }

    /// Request running inline `code` on `runtime`
    pub fn inline(code: impl Into<String>, runtime: RuntimeKind) -> Self {
        Self::new(ProgramSource::Inline(code.into())).with_runtime(runtime)
    }

    /// Request running the program stored at `path`
    pub fn path(path: impl Into<String>) -> Self {
        Self::new(ProgramSource::Path(path.into()))
    }

    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    /// Add a variable (later values replace earlier ones, keeping the first position)
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_uploads(mut self, files: Vec<UploadedFile>) -> Self {
        self.uploaded_files.extend(files);
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Value of the `_debug` variable (any case), if it is numeric
    pub fn debug_level(&self) -> Option<i64> {
        self.variables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("_debug"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }
}
