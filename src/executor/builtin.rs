//! Commands the shell runs itself.

pub mod commands;
pub mod flow;
pub mod io;
pub mod jobs;
pub mod manager;
pub mod test;
pub mod vars;

use std::io::Write;

use crate::executor::{report, ExecOutcome, ExecStatus};

pub use manager::{BuiltinCommand, BuiltinManager};

/// Writes to stdout. A closed pipe or full disk fails the builtin quietly.
pub(crate) fn write_out(text: &str) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()
}

pub(crate) fn status(code: i32) -> ExecStatus {
    Ok(ExecOutcome::Code(code))
}

/// Finishes a builtin that only prints.
pub(crate) fn printed(result: std::io::Result<()>) -> ExecStatus {
    status(if result.is_ok() { 0 } else { 1 })
}

/// Reports `message` prefixed with the builtin's name and returns `code`.
pub(crate) fn fail(builtin: &str, message: impl std::fmt::Display, code: i32) -> ExecStatus {
    report(format_args!("{builtin}: {message}"));
    status(code)
}

/// Quotes a value so the shell reads it back unchanged.
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:,+@%=".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
