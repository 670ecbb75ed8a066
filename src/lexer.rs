//! Logical-line reader (§4.1): joins backslash continuations, strips `#` comments outside quoted
//! regions, and manages a stack of nested `!include` sources (§4.1 Include directive).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::error::EngineError;

/// §4.1: "a reasonable depth limit (e.g., 32) prevents runaway recursion."
pub const MAX_INCLUDE_DEPTH: usize = 32;

struct Source {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_number: usize,
}

impl Source {
    fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| {
            EngineError::resource(
                format!("could not read '{}' ({})", path.display(), e),
                Context::new(),
            )
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    fn next_physical_line(&mut self) -> Result<Option<String>, EngineError> {
        match self.lines.next() {
            None => Ok(None),
            Some(Ok(line)) => {
                self.line_number += 1;
                Ok(Some(line))
            }
            Some(Err(e)) => Err(EngineError::resource(
                e.to_string(),
                Context {
                    path: Some(self.path.clone()),
                    line_number: self.line_number + 1,
                    ..Context::new()
                },
            )),
        }
    }
}

/// Feeds logical lines from a makefile (possibly spanning several `!include`d files) to the
/// preprocessor.
pub struct Lexer {
    stack: Vec<Source>,
    include_chain: Vec<PathBuf>,
}

impl Lexer {
    pub fn new(root_path: PathBuf) -> Result<Self, EngineError> {
        let source = Source::open(&root_path)?;
        Ok(Self {
            stack: vec![source],
            include_chain: vec![],
        })
    }

    /// Push a nested `!include`d file onto the stack, resolved by the caller relative to the
    /// including file's directory.
    pub fn push_include(&mut self, path: PathBuf) -> Result<(), EngineError> {
        if self.stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(EngineError::syntax(
                format!(
                    "'!include' nesting exceeds the maximum depth of {}",
                    MAX_INCLUDE_DEPTH
                ),
                self.current_context(),
            ));
        }
        self.include_chain.push(self.stack.last().unwrap().path.clone());
        self.stack.push(Source::open(&path)?);
        Ok(())
    }

    /// Returns the next logical line (continuations joined, comment stripped), or `None` once
    /// every source on the stack is exhausted.
    pub fn next_logical_line(&mut self) -> Result<Option<(String, Context)>, EngineError> {
        loop {
            if self.stack.is_empty() {
                return Ok(None);
            }
            let physical = {
                let src = self.stack.last_mut().unwrap();
                src.next_physical_line()?
            };
            match physical {
                None => {
                    self.stack.pop();
                    self.include_chain.pop();
                    continue;
                }
                Some(raw) => {
                    let mut line = strip_comment(&raw);
                    let context = self.current_context_for_line(&raw);

                    while ends_with_unescaped_backslash(&line) {
                        line.pop();
                        let src = self.stack.last_mut().unwrap();
                        match src.next_physical_line()? {
                            None => break,
                            Some(cont) => line.push_str(&strip_comment(&cont)),
                        }
                    }
                    return Ok(Some((line, context)));
                }
            }
        }
    }

    pub fn current_context(&self) -> Context {
        match self.stack.last() {
            None => Context::new(),
            Some(src) => Context {
                path: Some(src.path.clone()),
                line_number: src.line_number,
                column_number: 0,
                line: None,
                include_chain: self.include_chain.clone(),
            },
        }
    }

    fn current_context_for_line(&self, raw_line: &str) -> Context {
        let mut ctx = self.current_context();
        ctx.line = Some(raw_line.to_string());
        ctx
    }

    pub fn current_dir(&self) -> PathBuf {
        self.stack
            .last()
            .and_then(|s| s.path.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn ends_with_unescaped_backslash(line: &str) -> bool {
    let mut count = 0;
    for c in line.chars().rev() {
        if c == '\\' {
            count += 1;
        } else {
            break;
        }
    }
    count % 2 == 1
}

/// Strip a `#` comment that isn't inside a single- or double-quoted region.
fn strip_comment(line: &str) -> String {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return line[..i].to_string(),
            _ => {}
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_outside_quotes_is_stripped() {
        assert_eq!(strip_comment("echo hi # comment"), "echo hi ");
    }

    #[test]
    fn comment_inside_quotes_is_kept() {
        assert_eq!(strip_comment("echo \"a # b\""), "echo \"a # b\"");
    }

    #[test]
    fn unescaped_trailing_backslash_detected() {
        assert!(ends_with_unescaped_backslash("foo \\"));
        assert!(!ends_with_unescaped_backslash("foo \\\\"));
        assert!(!ends_with_unescaped_backslash("foo"));
    }
}
