//! The engine's error kinds (§7) and the diagnostic logging helpers used for user-facing output.
//!
//! `thiserror` derives `Display`/`Error` for `ErrorKind`; the surrounding `EngineError` keeps a
//! hand-rolled `Context`-aware formatter, since its exact `make: LEVEL | msg` text is part of
//! the CLI's documented output (asserted byte-for-byte by the system tests).

use thiserror::Error;

use crate::context::Context;

const INFO: &str = "INFO";
const WARN: &str = "WARN";
const ERROR: &str = "ERROR";
const MAX_SEVERITY_LENGTH: usize = 5;

/// Formatter for all user-facing log messages (§7's diagnostics land here).
fn format_log(msg: impl AsRef<str>, level: &str, context: Option<&Context>) -> String {
    let level_display = format!("{:<width$}", level, width = MAX_SEVERITY_LENGTH);
    let context_label = context
        .and_then(|c| c.label())
        .map(|l| format!("[{}] ", l))
        .unwrap_or_default();

    // Only show the source line if we are logging warnings or errors.
    let context_line = if level == WARN || level == ERROR {
        context
            .and_then(|c| c.display_line())
            .map(|l| format!("\n{}", l))
            .unwrap_or_default()
    } else {
        String::new()
    };

    format!(
        "make: {level_display} {context_label}| {}{}",
        msg.as_ref(),
        context_line
    )
}

/// Log an `INFO` message to STDERR.
pub fn log_info(msg: impl AsRef<str>, context: Option<&Context>) {
    eprintln!("{}", format_log(msg, INFO, context));
}

/// Log a `WARN` message to STDERR.
pub fn log_warn(msg: impl AsRef<str>, context: Option<&Context>) {
    eprintln!("{}", format_log(msg, WARN, context));
}

/// Log an `ERROR` message to STDERR.
pub fn log_error(msg: impl AsRef<str>, context: Option<&Context>) {
    eprintln!("{}", format_log(msg, ERROR, context));
}

/// The error kinds §7 requires the engine to distinguish. Carries only the message; the
/// surrounding [`EngineError`] carries the [`Context`].
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Malformed rule, unclosed continuation, unbalanced conditional.
    #[error("{0}")]
    Syntax(String),
    /// Duplicate recipe, undefined variable in strict mode, cycle, no rule for a demanded target.
    #[error("{0}")]
    Semantic(String),
    /// Non-zero exit from a recipe line not prefixed with `-`.
    #[error("{0}")]
    Command(String),
    /// Cannot open a file, cannot spawn a worker, out of memory, etc.
    #[error("{0}")]
    Resource(String),
    /// User interrupt.
    #[error("cancelled")]
    Cancelled,
}

/// A located engine error. [`std::fmt::Display`] renders it exactly like [`log_error`], since
/// `main.rs` prints `Display`ed top-level errors directly.
#[derive(Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub context: Context,
}

impl EngineError {
    pub fn new(kind: ErrorKind, context: Context) -> Self {
        Self { kind, context }
    }

    pub fn syntax(msg: impl Into<String>, context: Context) -> Self {
        Self::new(ErrorKind::Syntax(msg.into()), context)
    }

    pub fn semantic(msg: impl Into<String>, context: Context) -> Self {
        Self::new(ErrorKind::Semantic(msg.into()), context)
    }

    pub fn command(msg: impl Into<String>, context: Context) -> Self {
        Self::new(ErrorKind::Command(msg.into()), context)
    }

    pub fn resource(msg: impl Into<String>, context: Context) -> Self {
        Self::new(ErrorKind::Resource(msg.into()), context)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, Context::new())
    }

    /// Exit code: cancellation gets a distinguishable code (§7); everything else exits `2`.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::Cancelled => 130,
            _ => 2,
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            format_log(self.kind.to_string(), ERROR, Some(&self.context))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_label() {
        let mut context = Context::new();
        context.path = Some("Makefile".into());
        context.line_number = 3;
        let err = EngineError::semantic("cycle detected", context);
        let text = err.to_string();
        assert!(text.contains("Makefile:3"));
        assert!(text.contains("cycle detected"));
    }
}
