//! Tracks parsing/execution location for diagnostics: which makefile, which line, and (while
//! evaluating an `!include` chain) which files included it.

use std::path::PathBuf;

/// Represents parsing/execution context: which file and where in the file something is
/// happening, plus the chain of includes that got us there.
#[derive(Clone, Debug)]
pub struct Context {
    pub path: Option<PathBuf>,

    // Line/column number is determined when iterating the input, so we use `usize` here to match
    // the return type of `enumerate()`. Both are `1`-indexed to match the convention other
    // programs (including other make implementations) use when referencing line/column numbers,
    // so `0` is a sentinel value indicating that the value is not set.
    pub line_number: usize,
    pub column_number: usize,

    pub line: Option<String>,

    /// Files that `!include`d their way down to `path`, outermost first. Used to annotate
    /// "included from" chains in diagnostics; empty for the root makefile.
    pub include_chain: Vec<PathBuf>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            path: None,
            line_number: 0,
            column_number: 0,
            line: None,
            include_chain: vec![],
        }
    }

    pub fn label(&self) -> Option<String> {
        self.path.as_ref().map(|path| {
            if self.line_number == 0 {
                path.display().to_string()
            } else if self.column_number == 0 {
                format!("{}:{}", path.display(), self.line_number)
            } else {
                format!(
                    "{}:{}:{}",
                    path.display(),
                    self.line_number,
                    self.column_number
                )
            }
        })
    }

    pub fn display_line(&self) -> Option<String> {
        self.line.as_ref().map(|line| {
            let line_number_s = if self.line_number == 0 {
                String::new()
            } else {
                self.line_number.to_string()
            };
            let pad = " ".repeat(line_number_s.len());
            format!(
                "{pad} |\n{line_number} | {line}\n{pad} |\n",
                pad = pad,
                line_number = line_number_s,
                line = line,
            )
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl From<PathBuf> for Context {
    fn from(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            line_number: 0,
            column_number: 0,
            line: None,
            include_chain: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_without_line_number() {
        let ctx: Context = PathBuf::from("Makefile").into();
        assert_eq!(ctx.label().unwrap(), "Makefile");
    }

    #[test]
    fn label_with_line_number() {
        let mut ctx: Context = PathBuf::from("Makefile").into();
        ctx.line_number = 12;
        assert_eq!(ctx.label().unwrap(), "Makefile:12");
    }
}
