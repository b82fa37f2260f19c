//! Runtime executable configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runtime::RuntimeKind;

/// Runtime executables and inference priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimesConfig {
    /// Order in which runtimes are probed when a program path has no extension
    #[serde(default = "default_priority")]
    pub priority: Vec<RuntimeKind>,
    /// Pre-warmed statistical runtime
    #[serde(default)]
    pub sas: Option<RuntimeBinary>,
    /// Node.js
    #[serde(default)]
    pub js: Option<RuntimeBinary>,
    /// Python
    #[serde(default)]
    pub py: Option<RuntimeBinary>,
    /// R
    #[serde(default)]
    pub r: Option<RuntimeBinary>,
}

impl Default for RuntimesConfig {
    fn default() -> Self {
        RuntimesConfig {
            priority: default_priority(),
            sas: None,
            js: None,
            py: None,
            r: None,
        }
    }
}

fn default_priority() -> Vec<RuntimeKind> {
    RuntimeKind::ALL.to_vec()
}

impl RuntimesConfig {
    /// Executable configured for a runtime, if any
    pub fn binary(&self, kind: RuntimeKind) -> Option<&RuntimeBinary> {
        match kind {
            RuntimeKind::Sas => self.sas.as_ref(),
            RuntimeKind::Js => self.js.as_ref(),
            RuntimeKind::Py => self.py.as_ref(),
            RuntimeKind::R => self.r.as_ref(),
        }
    }

    /// Mutable slot for a runtime's executable
    pub fn binary_mut(&mut self, kind: RuntimeKind) -> &mut Option<RuntimeBinary> {
        match kind {
            RuntimeKind::Sas => &mut self.sas,
            RuntimeKind::Js => &mut self.js,
            RuntimeKind::Py => &mut self.py,
            RuntimeKind::R => &mut self.r,
        }
    }

    /// Enabled runtimes in priority order, followed by enabled runtimes the priority list omits
    pub fn enabled(&self) -> Vec<RuntimeKind> {
        let mut kinds: Vec<RuntimeKind> = Vec::new();
        for kind in self.priority.iter().chain(RuntimeKind::ALL.iter()) {
            if self.binary(*kind).is_some() && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

/// An interpreter executable plus fixed leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeBinary {
    /// Executable path or name on PATH
    pub path: PathBuf,
    /// Arguments placed before the generated ones
    #[serde(default)]
    pub args: Vec<String>,
}

impl RuntimeBinary {
    /// Binary with no extra arguments
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RuntimeBinary {
            path: path.into(),
            args: Vec::new(),
        }
    }
}
