//! Variable/text expansion (§4.1): `$(NAME)`, `${NAME}`, single-char `$X`, search-replace
//! `$(NAME:SEARCH=REPLACE)`, and the target-context variables `$$ $@ $* $** $? $<`.
//!
//! The core scan is an `O(n)` stack-based algorithm: push the buffer-so-far onto a stack at each
//! opening delimiter, and on a matching close, resolve the inner text and splice it back into
//! the popped buffer. A scope-aware lookup callback replaces a single flat variable map, and
//! recipe-context tokens plus the `:SEARCH=REPLACE` suffix are layered on top.

use log::debug;

use crate::context::Context;
use crate::error::EngineError;

/// Values substituted for `$@ $* $** $? $<` during recipe-line expansion (§4.1). Outside recipe
/// expansion these five sequences (and `$$`) expand to themselves, per spec.
pub struct RecipeVars<'a> {
    pub target: &'a str,
    pub stem: &'a str,
    pub all_deps: &'a str,
    pub changed_deps: &'a str,
    pub first_dep: &'a str,
}

struct Frame {
    previous_buffer: String,
    opening_delimiter: char,
}

/// Expand `s`, calling `lookup(name)` for every `$(NAME)`/`$NAME` occurrence. `recipe` is `Some`
/// only while expanding a recipe line at dispatch time (§4.1: recipe lines expand lazily).
pub fn expand(
    s: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    recipe: Option<&RecipeVars<'_>>,
    context: &Context,
) -> Result<String, EngineError> {
    let mut chars = s.chars().peekable();
    let mut stack: Vec<Frame> = vec![];
    let mut buf = String::with_capacity(s.len());

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek().copied() {
                Some('$') => {
                    chars.next();
                    buf.push_str(if recipe.is_some() { "$" } else { "$$" });
                }
                Some('@') => {
                    chars.next();
                    buf.push_str(recipe.map(|r| r.target).unwrap_or("$@"));
                }
                Some('<') => {
                    chars.next();
                    buf.push_str(recipe.map(|r| r.first_dep).unwrap_or("$<"));
                }
                Some('?') => {
                    chars.next();
                    buf.push_str(recipe.map(|r| r.changed_deps).unwrap_or("$?"));
                }
                Some('*') => {
                    chars.next();
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        buf.push_str(recipe.map(|r| r.all_deps).unwrap_or("$**"));
                    } else {
                        buf.push_str(recipe.map(|r| r.stem).unwrap_or("$*"));
                    }
                }
                Some(open @ ('(' | '{')) => {
                    chars.next();
                    stack.push(Frame {
                        previous_buffer: std::mem::take(&mut buf),
                        opening_delimiter: open,
                    });
                }
                Some(nc) if nc.is_alphanumeric() || nc == '_' || nc == '.' => {
                    chars.next();
                    buf.push_str(&resolve(&nc.to_string(), lookup));
                }
                _ => buf.push('$'),
            }
            continue;
        }

        if c == ')' || c == '}' {
            let matches_top = matches!(
                stack.last(),
                Some(f) if (c == ')' && f.opening_delimiter == '(') || (c == '}' && f.opening_delimiter == '{')
            );
            if matches_top {
                let frame = stack.pop().expect("checked non-empty above");
                let inner = std::mem::replace(&mut buf, frame.previous_buffer);
                buf.push_str(&resolve(&inner, lookup));
                continue;
            }
            buf.push(c);
            continue;
        }

        buf.push(c);
    }

    match stack.pop() {
        None => Ok(buf),
        Some(frame) => Err(EngineError::syntax(
            format!(
                "unclosed variable reference: {}{}",
                frame.opening_delimiter, frame.previous_buffer
            ),
            context.clone(),
        )),
    }
}

/// Resolve the (already-flattened) inner text of a `$(...)`/`${...}` expression or a single-char
/// `$X`: either a plain variable name, or `NAME:SEARCH=REPLACE`.
fn resolve(inner: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let (name, subst) = match inner.split_once(':') {
        Some((name, rest)) => match rest.split_once('=') {
            Some((search, replace)) => (name, Some((search, replace))),
            None => (inner, None),
        },
        None => (inner, None),
    };

    let value = match lookup(name) {
        Some(v) => v,
        None => {
            debug!("undefined variable '{}' expands to empty string", name);
            String::new()
        }
    };

    match subst {
        Some((search, replace)) if !search.is_empty() => value.replace(search, replace),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_for(vars: &HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |name: &str| vars.get(name).map(|v| v.to_string())
    }

    #[test]
    fn single_char_and_long_form() {
        let vars = HashMap::from([("A", "VALUE A"), ("TESTB", "VALUE B")]);
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(expand("$A", &lookup, None, &ctx).unwrap(), "VALUE A");
        assert_eq!(
            expand("$(TESTB) end", &lookup, None, &ctx).unwrap(),
            "VALUE B end"
        );
    }

    #[test]
    fn nested_expansion() {
        let vars = HashMap::from([("A", "B"), ("B", "VALUE1")]);
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(expand("$($(A))", &lookup, None, &ctx).unwrap(), "VALUE1");
    }

    #[test]
    fn search_replace() {
        let vars = HashMap::from([("SRCS", "a.c b.c c.c")]);
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(
            expand("$(SRCS:.c=.o)", &lookup, None, &ctx).unwrap(),
            "a.o b.o c.o"
        );
    }

    #[test]
    fn recipe_context_vars_resolve_only_in_recipe() {
        let vars = HashMap::new();
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(expand("$@", &lookup, None, &ctx).unwrap(), "$@");

        let recipe = RecipeVars {
            target: "out.o",
            stem: "out",
            all_deps: "a.c b.h",
            changed_deps: "a.c",
            first_dep: "a.c",
        };
        assert_eq!(expand("$@", &lookup, Some(&recipe), &ctx).unwrap(), "out.o");
        assert_eq!(expand("$<", &lookup, Some(&recipe), &ctx).unwrap(), "a.c");
        assert_eq!(
            expand("$**", &lookup, Some(&recipe), &ctx).unwrap(),
            "a.c b.h"
        );
        assert_eq!(expand("$*", &lookup, Some(&recipe), &ctx).unwrap(), "out");
    }

    #[test]
    fn double_dollar_escapes_outside_recipe_is_literal_pair() {
        let vars = HashMap::new();
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(expand("$$", &lookup, None, &ctx).unwrap(), "$$");
    }

    #[test]
    fn unclosed_expansion_is_a_syntax_error() {
        let vars = HashMap::from([("TEST", "Value")]);
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert!(expand("${TEST", &lookup, None, &ctx).is_err());
    }

    #[test]
    fn undefined_variable_expands_empty() {
        let vars = HashMap::new();
        let lookup = lookup_for(&vars);
        let ctx = Context::new();
        assert_eq!(expand("[$(MISSING)]", &lookup, None, &ctx).unwrap(), "[]");
    }
}
