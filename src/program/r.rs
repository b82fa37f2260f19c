//! R programs
//!
//! R identifiers cannot start with `_`, so injected names get a leading `.`
//! (`_WEBOUT` becomes `._WEBOUT`).

use super::{
    declarations, string_literal, upload_bindings, upload_declarations, BuildInput, ProgramBuilder,
};
use crate::runtime::RuntimeKind;

const RESERVED: &[&str] = &[
    "if", "else", "repeat", "while", "function", "for", "next", "break", "in", "TRUE",
    "FALSE", "NULL", "Inf", "NaN", "NA", "NA_integer_", "NA_real_", "NA_character_",
    "NA_complex_",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RProgram;

impl ProgramBuilder for RProgram {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::R
    }

    fn build(&self, input: &BuildInput<'_>) -> String {
        let uploads = upload_bindings(input);
        let mut out = String::new();

        for (name, value) in declarations(input, |name| !RESERVED.contains(&name))
            .into_iter()
            .chain(upload_declarations(&uploads))
        {
            out.push_str(&format!("{} <- {}\n", r_name(&name), string_literal(&value)));
        }
        if !uploads.is_empty() {
            out.push_str(&format!(
                "{} <- {}\n",
                r_name("_WEBIN_FILE_COUNT"),
                uploads.len()
            ));
        }

        out.push('\n');
        out.push_str(input.code);
        out
    }
}

fn r_name(name: &str) -> String {
    if name.starts_with('_') {
        format!(".{}", name)
    } else {
        name.to_string()
    }
}
