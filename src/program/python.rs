//! Python programs

use super::{
    declarations, string_literal, upload_bindings, upload_declarations, BuildInput, ProgramBuilder,
};
use crate::runtime::RuntimeKind;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonProgram;

impl ProgramBuilder for PythonProgram {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Py
    }

    fn build(&self, input: &BuildInput<'_>) -> String {
        let uploads = upload_bindings(input);
        let mut out = String::new();

        for (name, value) in declarations(input, |name| !KEYWORDS.contains(&name))
            .into_iter()
            .chain(upload_declarations(&uploads))
        {
            out.push_str(&format!("{} = {}\n", name, string_literal(&value)));
        }
        if !uploads.is_empty() {
            out.push_str(&format!("_WEBIN_FILE_COUNT = {}\n", uploads.len()));
        }

        out.push('\n');
        out.push_str(input.code);
        out
    }
}
