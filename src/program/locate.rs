//! Program location and runtime inference

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::runtime::RuntimeKind;

/// Where the program text comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramSource {
    /// Program text supplied with the request
    Inline(String),
    /// Path under the programs root, with or without a runtime extension
    Path(String),
}

/// A program ready to build, with its runtime decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProgram {
    pub runtime: RuntimeKind,
    pub code: String,
    /// File the code was read from; `None` for inline code
    pub origin: Option<PathBuf>,
}

/// Resolves program paths under a root directory
#[derive(Debug, Clone)]
pub struct ProgramLocator {
    root: PathBuf,
    priority: Vec<RuntimeKind>,
}

impl ProgramLocator {
    /// `priority` lists the runtimes that may be inferred, most preferred first
    pub fn new(root: impl Into<PathBuf>, priority: Vec<RuntimeKind>) -> Self {
        ProgramLocator {
            root: root.into(),
            priority,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the program text and decide its runtime
    pub async fn resolve(
        &self,
        source: &ProgramSource,
        runtime: Option<RuntimeKind>,
    ) -> Result<ResolvedProgram> {
        match source {
            ProgramSource::Inline(code) => {
                let runtime = runtime.ok_or_else(|| {
                    Error::UnsupportedRuntime("inline code needs an explicit runtime".to_string())
                })?;
                Ok(ResolvedProgram {
                    runtime,
                    code: code.clone(),
                    origin: None,
                })
            }
            ProgramSource::Path(path) => {
                let (runtime, file) = self.locate(path, runtime).await?;
                let code = tokio::fs::read_to_string(&file).await?;
                Ok(ResolvedProgram {
                    runtime,
                    code,
                    origin: Some(file),
                })
            }
        }
    }

    /// Find the file behind `path`.
    ///
    /// A known runtime extension decides the runtime. Otherwise an explicit `runtime`
    /// appends its extension, and without one every runtime in priority order is probed;
    /// the first existing candidate wins.
    pub async fn locate(
        &self,
        path: &str,
        runtime: Option<RuntimeKind>,
    ) -> Result<(RuntimeKind, PathBuf)> {
        let relative = sanitize(path)?;
        let base = self.root.join(&relative);

        let by_extension = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(RuntimeKind::from_extension);
        if let Some(kind) = by_extension {
            if let Some(requested) = runtime.filter(|r| *r != kind) {
                return Err(Error::UnsupportedRuntime(format!(
                    "{} is a {} program, {} was requested",
                    path, kind, requested
                )));
            }
            return if is_file(&base).await {
                Ok((kind, base))
            } else {
                Err(Error::ProgramNotFound(path.to_string()))
            };
        }

        if let Some(kind) = runtime {
            let candidate = with_suffix(&base, kind);
            return if is_file(&candidate).await {
                Ok((kind, candidate))
            } else {
                Err(Error::ProgramNotFound(path.to_string()))
            };
        }

        let mut found = Vec::new();
        for kind in &self.priority {
            let candidate = with_suffix(&base, *kind);
            if is_file(&candidate).await {
                found.push((*kind, candidate));
            }
        }

        if found.len() > 1 {
            let kinds: Vec<String> = found.iter().map(|(k, _)| k.to_string()).collect();
            warn!(
                program = %path,
                candidates = %kinds.join(","),
                "Several runtimes match program, using the highest priority"
            );
        }
        match found.into_iter().next() {
            Some((kind, file)) => {
                debug!(program = %path, runtime = %kind, "Runtime inferred");
                Ok((kind, file))
            }
            None => Err(Error::ProgramNotFound(path.to_string())),
        }
    }
}

fn sanitize(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("program path is empty".to_string()));
    }
    let relative = PathBuf::from(trimmed);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::InvalidInput(format!(
            "program path must stay inside the programs root: {}",
            path
        )));
    }
    Ok(relative)
}

fn with_suffix(base: &Path, kind: RuntimeKind) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(kind.extension());
    PathBuf::from(name)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn locator(root: &Path) -> ProgramLocator {
        std::fs::create_dir_all(root.join("reports")).unwrap();
        std::fs::write(root.join("reports/summary.sas"), "%put summary;").unwrap();
        std::fs::write(root.join("reports/summary.py"), "print('summary')").unwrap();
        std::fs::write(root.join("reports/only.r"), "cat('r')").unwrap();
        ProgramLocator::new(root, vec![RuntimeKind::Sas, RuntimeKind::Js, RuntimeKind::Py, RuntimeKind::R])
    }

    #[tokio::test]
    async fn test_extension_selects_runtime() {
        let dir = tempdir().unwrap();
        let locator = locator(dir.path());

        let (kind, file) = locator.locate("/reports/summary.py", None).await.unwrap();
        assert_eq!(kind, RuntimeKind::Py);
        assert_eq!(file, dir.path().join("reports/summary.py"));

        let mismatch = locator.locate("reports/summary.py", Some(RuntimeKind::Sas)).await;
        assert!(matches!(mismatch, Err(Error::UnsupportedRuntime(_))));
    }

    #[tokio::test]
    async fn test_explicit_runtime_appends_extension() {
        let dir = tempdir().unwrap();
        let locator = locator(dir.path());

        let (kind, file) = locator
            .locate("reports/summary", Some(RuntimeKind::Py))
            .await
            .unwrap();
        assert_eq!(kind, RuntimeKind::Py);
        assert!(file.ends_with("summary.py"));

        let missing = locator.locate("reports/summary", Some(RuntimeKind::Js)).await;
        assert!(matches!(missing, Err(Error::ProgramNotFound(_))));
    }

    #[tokio::test]
    async fn test_inference_follows_priority() {
        let dir = tempdir().unwrap();
        let locator = locator(dir.path());

        // Both .sas and .py exist: the higher priority wins
        let (kind, _) = locator.locate("reports/summary", None).await.unwrap();
        assert_eq!(kind, RuntimeKind::Sas);

        let reordered = ProgramLocator::new(dir.path(), vec![RuntimeKind::Py, RuntimeKind::Sas]);
        let (kind, _) = reordered.locate("reports/summary", None).await.unwrap();
        assert_eq!(kind, RuntimeKind::Py);

        // Runtimes outside the priority list are never inferred
        let (kind, _) = locator.locate("reports/only", None).await.unwrap();
        assert_eq!(kind, RuntimeKind::R);
        let without_r = ProgramLocator::new(dir.path(), vec![RuntimeKind::Sas]);
        assert!(matches!(
            without_r.locate("reports/only", None).await,
            Err(Error::ProgramNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_parent_components_rejected() {
        let dir = tempdir().unwrap();
        let locator = locator(dir.path());

        for path in ["../etc/passwd", "reports/../../x", ""] {
            assert!(matches!(
                locator.locate(path, None).await,
                Err(Error::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_resolve() {
        let dir = tempdir().unwrap();
        let locator = locator(dir.path());

        let program = locator
            .resolve(&ProgramSource::Path("reports/only".to_string()), None)
            .await
            .unwrap();
        assert_eq!(program.code, "cat('r')");
        assert_eq!(program.runtime, RuntimeKind::R);

        let inline = locator
            .resolve(&ProgramSource::Inline("emit('x')".to_string()), None)
            .await;
        assert!(matches!(inline, Err(Error::UnsupportedRuntime(_))));
    }
}
