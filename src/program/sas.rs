//! Pre-warmed statistical runtime
//!
//! Declarations become `%let` statements, uploads get a `filename` each, and the
//! `mfs_httpheader` macro lets the program append response headers to `_WEBOUT_HEADERS`.
//! The caller's preamble runs between the declarations and the program.

use std::path::Path;
use std::time::Duration;

use super::{declarations, upload_bindings, BuildInput, ProgramBuilder};
use crate::runtime::RuntimeKind;

const HEADER_MACRO: &str = r#"%macro mfs_httpheader(header,value);
  %local fref fid rc;
  %let rc=%sysfunc(filename(fref,&_WEBOUT_HEADERS));
  %let fid=%sysfunc(fopen(&fref,A));
  %if &fid=0 %then %do;
    %put %str(ERR)OR: %sysfunc(sysmsg());
    %return;
  %end;
  %let rc=%sysfunc(fput(&fid,%superq(header): %superq(value)));
  %let rc=%sysfunc(fwrite(&fid));
  %let rc=%sysfunc(fclose(&fid));
  %let rc=%sysfunc(filename(fref));
%mend mfs_httpheader;
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct SasProgram;

impl ProgramBuilder for SasProgram {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Sas
    }

    fn build(&self, input: &BuildInput<'_>) -> String {
        let mut out = String::new();

        for (name, value) in declarations(input, declarable) {
            out.push_str(&format!("%let {}={};\n", name, macro_value(&value)));
        }

        let uploads = upload_bindings(input);
        for upload in &uploads {
            let fileref = format!("_WEBIN{}", upload.index);
            out.push_str(&format!(
                "filename {} {};\n",
                fileref,
                quoted_path(&upload.path)
            ));
            out.push_str(&format!("%let _WEBIN_FILEREF{}={};\n", upload.index, fileref));
            out.push_str(&format!(
                "%let _WEBIN_FILENAME{}={};\n",
                upload.index,
                macro_value(&upload.original_name)
            ));
            out.push_str(&format!(
                "%let _WEBIN_NAME{}={};\n",
                upload.index,
                macro_value(&upload.field_name)
            ));
        }
        if !uploads.is_empty() {
            out.push_str(&format!("%let _WEBIN_FILE_COUNT={};\n", uploads.len()));
        }

        out.push_str(&format!(
            "filename _webout {} lrecl=32767 encoding='utf-8';\n",
            quoted_path(&input.paths.webout)
        ));
        out.push_str(HEADER_MACRO);

        if let Some(preamble) = input.preamble.filter(|p| !p.trim().is_empty()) {
            out.push_str(preamble);
            if !preamble.ends_with('\n') {
                out.push('\n');
            }
        }

        out.push_str(input.code);
        if !input.code.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Longest macro variable name the runtime accepts
const MAX_NAME_LEN: usize = 32;

/// Automatic macro variables use the `SYS` prefix and are read-only
fn declarable(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && !name.to_ascii_uppercase().starts_with("SYS")
}

/// Startup hook of a parked process.
///
/// Deletes the placeholder program (the readiness signal), then sleeps in short steps
/// until the program reappears or `wait` runs out. The runtime reads the program as its
/// input once the hook returns.
pub fn bootstrap_script(code: &Path, wait: Duration) -> String {
    let path = quoted_path(code);
    format!(
        "data _null_;\n\
         \x20 length fref $8;\n\
         \x20 fref = ' ';\n\
         \x20 rc = filename(fref, {path});\n\
         \x20 rc = fdelete(fref);\n\
         \x20 rc = filename(fref);\n\
         \x20 limit = datetime() + {seconds};\n\
         \x20 do while (not fileexist({path}) and datetime() < limit);\n\
         \x20   call sleep(100, 0.001);\n\
         \x20 end;\n\
         run;\n",
        path = path,
        seconds = wait.as_secs().max(1),
    )
}

/// `%let` right-hand side, wrapped in `%nrstr` only when it carries special characters
fn macro_value(value: &str) -> String {
    const SPECIAL: &[char] = &['%', '&', ';', '\'', '"', '(', ')', ','];
    let needs_quoting = value.contains(SPECIAL)
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if !needs_quoting {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '%' | '\'' | '"' | '(' | ')' => {
                escaped.push('%');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    format!("%nrstr({})", escaped)
}

/// Single-quoted so `&` and `%` in paths are not resolved as macro references
fn quoted_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_build_fixture() {
        let caller = caller();
        let paths = paths(RuntimeKind::Sas);
        let mut variables = IndexMap::new();
        variables.insert("_debug".to_string(), "131".to_string());
        variables.insert("where".to_string(), "a=1 & b=2".to_string());

        let program = SasProgram.build(&BuildInput {
            code: "%mfs_httpheader(Content-Type,text/csv);",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &[],
            preamble: Some("options nosource;"),
        });

        let lines: Vec<&str> = program.lines().collect();
        assert_eq!(lines[0], "%let _debug=131;");
        assert_eq!(lines[1], "%let where=%nrstr(a=1 & b=2);");
        assert_eq!(lines[2], "%let _SESSION_PATH=/srv/sessions/1700000000000-ab12cd34;");
        assert!(lines.contains(&"%let _DISPLAYNAME=Alice Example;"));
        assert!(lines.contains(&"%let _REQHEADER_X_REQUEST_ID=abc-123;"));
        assert!(lines.contains(
            &"filename _webout '/srv/sessions/1700000000000-ab12cd34/webout.txt' lrecl=32767 encoding='utf-8';"
        ));
        assert!(!program.contains("_WEBIN_FILE_COUNT"));

        // Declarations, then header macro, then preamble, then program
        let header_macro = program.find("%macro mfs_httpheader").unwrap();
        let preamble = program.find("options nosource;").unwrap();
        let code = program.find("%mfs_httpheader(Content-Type").unwrap();
        assert!(header_macro < preamble && preamble < code);
        assert!(program.ends_with("%mfs_httpheader(Content-Type,text/csv);\n"));
    }

    #[test]
    fn test_upload_declarations() {
        let caller = caller();
        let paths = paths(RuntimeKind::Sas);
        let uploads = upload();
        let variables = IndexMap::new();

        let program = SasProgram.build(&BuildInput {
            code: "",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &uploads,
            preamble: None,
        });

        assert!(program.contains(
            "filename _WEBIN1 '/srv/sessions/1700000000000-ab12cd34/req_file_abc';\n"
        ));
        assert!(program.contains("%let _WEBIN_FILEREF1=_WEBIN1;\n"));
        assert!(program.contains("%let _WEBIN_FILENAME1=data.csv;\n"));
        assert!(program.contains("%let _WEBIN_NAME1=file;\n"));
        assert!(program.contains("%let _WEBIN_FILE_COUNT=1;\n"));
    }

    #[test]
    fn test_long_and_automatic_names_skipped() {
        let mut caller = caller();
        caller.forwarded_headers = vec![
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
            ("Accept".to_string(), "text/html".to_string()),
        ];
        let paths = paths(RuntimeKind::Sas);
        let mut variables = IndexMap::new();
        variables.insert("sysdate".to_string(), "01JAN2024".to_string());
        variables.insert("a_rather_long_report_parameter_name".to_string(), "x".to_string());
        variables.insert("a_report_parameter_of_32_chars_x".to_string(), "y".to_string());

        let program = SasProgram.build(&BuildInput {
            code: "",
            caller: &caller,
            variables: &variables,
            paths: &paths,
            uploads: &[],
            preamble: None,
        });

        assert!(!program.contains("UPGRADE_INSECURE_REQUESTS"));
        assert!(!program.contains("%let sysdate="));
        assert!(!program.contains("a_rather_long_report_parameter_name"));
        assert!(program.contains("%let a_report_parameter_of_32_chars_x=y;\n"));
        assert!(program.contains("%let _REQHEADER_ACCEPT=text/html;\n"));
        for line in program.lines().filter(|l| l.starts_with("%let ")) {
            let name = line["%let ".len()..].split('=').next().unwrap();
            assert!(name.len() <= MAX_NAME_LEN, "{} is too long", name);
        }
    }

    #[test]
    fn test_macro_value_quoting() {
        assert_eq!(macro_value("plain text"), "plain text");
        assert_eq!(macro_value("50%"), "%nrstr(50%%)");
        assert_eq!(macro_value("O'Brien"), "%nrstr(O%'Brien)");
        assert_eq!(macro_value("f(x)"), "%nrstr(f%(x%))");
        assert_eq!(macro_value(" padded"), "%nrstr( padded)");
    }

    #[test]
    fn test_bootstrap_script() {
        let script = bootstrap_script(Path::new("/s/it's/code.sas"), Duration::from_secs(900));
        assert!(script.starts_with("data _null_;\n"));
        assert!(script.contains("rc = filename(fref, '/s/it''s/code.sas');"));
        assert!(script.contains("rc = fdelete(fref);"));
        assert!(script.contains("limit = datetime() + 900;"));
        assert!(script.contains("fileexist('/s/it''s/code.sas')"));
        assert!(script.ends_with("run;\n"));
    }
}
