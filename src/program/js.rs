//! Node.js programs

use super::{
    declarations, string_literal, upload_bindings, upload_declarations, BuildInput, ProgramBuilder,
};
use crate::runtime::RuntimeKind;

/// Words that cannot name a `const` binding
const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for",
    "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with",
    "yield",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct JsProgram;

impl ProgramBuilder for JsProgram {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Js
    }

    fn build(&self, input: &BuildInput<'_>) -> String {
        let uploads = upload_bindings(input);
        let mut out = String::new();

        for (name, value) in declarations(input, |name| !KEYWORDS.contains(&name))
            .into_iter()
            .chain(upload_declarations(&uploads))
        {
            out.push_str(&format!("const {} = {};\n", name, string_literal(&value)));
        }
        if !uploads.is_empty() {
            out.push_str(&format!("const _WEBIN_FILE_COUNT = {};\n", uploads.len()));
        }

        out.push('\n');
        out.push_str(input.code);
        out
    }
}
