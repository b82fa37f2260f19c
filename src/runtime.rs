//! Runtime kinds supported by the pools

use serde::{Deserialize, Serialize};

/// Interpreter runtime a program targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Statistical runtime, started ahead of demand
    Sas,
    /// Node.js
    Js,
    /// Python
    Py,
    /// R
    R,
}

impl RuntimeKind {
    /// All runtimes in default priority order
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::Sas,
        RuntimeKind::Js,
        RuntimeKind::Py,
        RuntimeKind::R,
    ];

    /// File extension of programs written for this runtime
    pub fn extension(&self) -> &'static str {
        match self {
            RuntimeKind::Sas => "sas",
            RuntimeKind::Js => "js",
            RuntimeKind::Py => "py",
            RuntimeKind::R => "r",
        }
    }

    /// Whether sessions for this runtime carry a parked process
    pub fn is_prewarmed(&self) -> bool {
        matches!(self, RuntimeKind::Sas)
    }

    /// Find the runtime owning a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(ext))
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sas" => Ok(RuntimeKind::Sas),
            "js" | "javascript" | "node" => Ok(RuntimeKind::Js),
            "py" | "python" => Ok(RuntimeKind::Py),
            "r" => Ok(RuntimeKind::R),
            _ => Err(crate::Error::UnsupportedRuntime(format!(
                "{}. Valid: sas, js, py, r",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
