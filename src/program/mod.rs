//! Program assembly
//!
//! Turns raw program text plus request context into the source file a runtime executes.
//! One [`ProgramBuilder`] per runtime; all of them inject the same declarations, each in
//! its own syntax.

mod js;
mod locate;
mod python;
mod r;
mod sas;

pub use js::JsProgram;
pub use locate::{ProgramLocator, ProgramSource, ResolvedProgram};
pub use python::PythonProgram;
pub use r::RProgram;
pub use sas::{bootstrap_script, SasProgram};

use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::debug;

use crate::orchestrator::{CallerContext, UploadedFile};
use crate::runtime::RuntimeKind;
use crate::session::SessionPaths;

/// Names the builders inject themselves; request variables may not shadow them
pub const RESERVED_NAMES: &[&str] = &[
    "_SESSION_PATH",
    "_WEBOUT",
    "_WEBOUT_HEADERS",
    "_LOG_PATH",
    "_USERNAME",
    "_USERID",
    "_DISPLAYNAME",
    "_SERVER_URL",
    "_METAUSER",
    "_METAPERSON",
    "_WEBIN_FILE_COUNT",
];

const RESERVED_PREFIXES: &[&str] = &["_WEBIN_", "_REQHEADER_"];

/// Everything a builder needs for one execution
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub code: &'a str,
    pub caller: &'a CallerContext,
    pub variables: &'a IndexMap<String, String>,
    pub paths: &'a SessionPaths,
    pub uploads: &'a [UploadedFile],
    pub preamble: Option<&'a str>,
}

/// Produces the final source text for one runtime
pub trait ProgramBuilder: Send + Sync {
    fn runtime(&self) -> RuntimeKind;

    fn build(&self, input: &BuildInput<'_>) -> String;
}

/// Builder for `runtime`
pub fn builder_for(runtime: RuntimeKind) -> &'static dyn ProgramBuilder {
    match runtime {
        RuntimeKind::Sas => &SasProgram,
        RuntimeKind::Js => &JsProgram,
        RuntimeKind::Py => &PythonProgram,
        RuntimeKind::R => &RProgram,
    }
}

/// One uploaded file as the program sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadBinding {
    /// 1-based position
    pub index: usize,
    pub path: PathBuf,
    pub original_name: String,
    pub field_name: String,
}

/// Scalar declarations in emission order: variables, session paths, caller, forwarded headers.
///
/// Request variables and forwarded headers whose name `accepts` rejects are left out.
/// Headers that map to the same name are declared once, values joined with `, `.
pub(crate) fn declarations(
    input: &BuildInput<'_>,
    accepts: impl Fn(&str) -> bool,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();

    for (name, value) in input.variables {
        if !is_identifier(name) {
            debug!(variable = %name, "Skipping variable with invalid name");
            continue;
        }
        if is_reserved(name) {
            debug!(variable = %name, "Skipping variable shadowing an injected name");
            continue;
        }
        if !accepts(name) {
            debug!(variable = %name, "Skipping variable the runtime cannot declare");
            continue;
        }
        out.push((name.clone(), value.clone()));
    }

    let paths = input.paths;
    let caller = input.caller;
    for (name, value) in [
        ("_SESSION_PATH", paths.dir.to_string_lossy().into_owned()),
        ("_WEBOUT", paths.webout.to_string_lossy().into_owned()),
        ("_WEBOUT_HEADERS", paths.headers.to_string_lossy().into_owned()),
        ("_LOG_PATH", paths.log.to_string_lossy().into_owned()),
        ("_USERNAME", caller.username.clone()),
        ("_USERID", caller.user_id.clone()),
        ("_DISPLAYNAME", caller.display_name.clone()),
        ("_SERVER_URL", caller.server_url.clone()),
        ("_METAUSER", caller.username.clone()),
        ("_METAPERSON", caller.display_name.clone()),
    ] {
        out.push((name.to_string(), value));
    }

    let mut headers: IndexMap<String, String> = IndexMap::new();
    for (header, value) in &caller.forwarded_headers {
        let name = forwarded_header_name(header);
        if !accepts(&name) {
            debug!(header = %header, "Skipping forwarded header the runtime cannot declare");
            continue;
        }
        headers
            .entry(name)
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    out.extend(headers);

    out
}

pub(crate) fn upload_bindings(input: &BuildInput<'_>) -> Vec<UploadBinding> {
    input
        .uploads
        .iter()
        .enumerate()
        .map(|(i, file)| UploadBinding {
            index: i + 1,
            path: input.paths.upload(&file.stored_name),
            original_name: file.original_name.clone(),
            field_name: file.field_name.clone(),
        })
        .collect()
}

/// Upload sets for runtimes that address files by path: `_WEBIN_FILEREF<n>` is the path
pub(crate) fn upload_declarations(bindings: &[UploadBinding]) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(bindings.len() * 3);
    for upload in bindings {
        out.push((
            format!("_WEBIN_FILEREF{}", upload.index),
            upload.path.to_string_lossy().into_owned(),
        ));
        out.push((
            format!("_WEBIN_FILENAME{}", upload.index),
            upload.original_name.clone(),
        ));
        out.push((format!("_WEBIN_NAME{}", upload.index), upload.field_name.clone()));
    }
    out
}

/// Double-quoted literal valid in JavaScript, Python and R
pub(crate) fn string_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// `x-request-id` -> `_REQHEADER_X_REQUEST_ID`
pub fn forwarded_header_name(header: &str) -> String {
    let suffix: String = header
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("_REQHEADER_{}", suffix)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_NAMES.contains(&upper.as_str())
        || RESERVED_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn caller() -> CallerContext {
        CallerContext {
            username: "alice".to_string(),
            user_id: "7".to_string(),
            display_name: "Alice Example".to_string(),
            server_url: "http://localhost:5000".to_string(),
            forwarded_headers: vec![("x-request-id".to_string(), "abc-123".to_string())],
        }
    }

    pub fn paths(runtime: RuntimeKind) -> SessionPaths {
        SessionPaths::new(PathBuf::from("/srv/sessions/1700000000000-ab12cd34"), runtime)
    }

    pub fn upload() -> Vec<UploadedFile> {
        vec![UploadedFile {
            stored_name: "req_file_abc".to_string(),
            original_name: "data.csv".to_string(),
            field_name: "file".to_string(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_declaration_order_and_filtering() {
        let caller = caller();
        let paths = paths(RuntimeKind::Py);
        let mut variables = IndexMap::new();
        variables.insert("_debug".to_string(), "131".to_string());
        variables.insert("bad name".to_string(), "x".to_string());
        variables.insert("_webout".to_string(), "/etc/passwd".to_string());
        variables.insert("_WEBIN_FILE_COUNT".to_string(), "9".to_string());
        variables.insert("region".to_string(), "emea".to_string());

        let input = BuildInput {
            code: "",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &[],
            preamble: None,
        };
        let decls = declarations(&input, |_| true);
        let names: Vec<&str> = decls.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(&names[..3], &["_debug", "region", "_SESSION_PATH"]);
        assert!(names.contains(&"_REQHEADER_X_REQUEST_ID"));
        assert!(!names.contains(&"bad name"));
        assert_eq!(names.iter().filter(|n| n.eq_ignore_ascii_case("_WEBOUT")).count(), 1);
        assert!(!names.contains(&"_WEBIN_FILE_COUNT"));
    }

    #[test]
    fn test_repeated_headers_declared_once() {
        let mut caller = caller();
        caller.forwarded_headers = vec![
            ("accept".to_string(), "text/html".to_string()),
            ("x-a".to_string(), "1".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
            ("x_a".to_string(), "2".to_string()),
        ];
        let paths = paths(RuntimeKind::Js);
        let variables = IndexMap::new();
        let input = BuildInput {
            code: "",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &[],
            preamble: None,
        };

        let headers: Vec<(String, String)> = declarations(&input, |_| true)
            .into_iter()
            .filter(|(name, _)| name.starts_with("_REQHEADER_"))
            .collect();
        assert_eq!(
            headers,
            vec![
                ("_REQHEADER_ACCEPT".to_string(), "text/html, */*".to_string()),
                ("_REQHEADER_X_A".to_string(), "1, 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejected_names_are_skipped() {
        let caller = caller();
        let paths = paths(RuntimeKind::Py);
        let mut variables = IndexMap::new();
        variables.insert("from".to_string(), "2024-01-01".to_string());
        variables.insert("until".to_string(), "2024-02-01".to_string());
        let input = BuildInput {
            code: "",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &[],
            preamble: None,
        };

        let decls = declarations(&input, |name| name != "from" && !name.starts_with("_REQHEADER_"));
        let names: Vec<&str> = decls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names[0], "until");
        assert!(!names.contains(&"from"));
        assert!(!names.iter().any(|n| n.starts_with("_REQHEADER_")));
        // Injected names are never filtered
        assert!(names.contains(&"_WEBOUT"));
    }

    #[test]
    fn test_builder_for_matches_runtime() {
        for runtime in RuntimeKind::ALL {
            assert_eq!(builder_for(runtime).runtime(), runtime);
        }
    }

    #[test]
    fn test_forwarded_header_name() {
        assert_eq!(forwarded_header_name("X-Forwarded-For"), "_REQHEADER_X_FORWARDED_FOR");
        assert_eq!(forwarded_header_name("accept"), "_REQHEADER_ACCEPT");
    }
}
