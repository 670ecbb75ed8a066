//! Makefile preprocessor (§4.1): directive evaluation, conditional nesting, `!if` expression
//! evaluation, and the rule-line/assignment-line parsing that populates the scope tree, variable
//! store, and target graph.
//!
//! Variable expansion for plain lines happens once, up front, via [`crate::expand::expand`]
//! (§4.1: "before classification...each line has `$(NAME)`...replaced"). `!if`/`!ifdef`/
//! `!ifndef`/`!elseif` expressions are the one exception: they are expanded operand-by-operand
//! during evaluation instead, so `defined(NAME)` can see the literal variable name rather than
//! whatever it expands to (see DESIGN.md).

use std::time::SystemTime;

use log::debug;

use crate::cache::PreprocessorCache;
use crate::context::Context;
use crate::error::EngineError;
use crate::expand::{self, RecipeVars};
use crate::graph::{InferenceRule, RecipeLine, RecipeStep, TargetGraph, TargetId};
use crate::lexer::Lexer;
use crate::options::Options;
use crate::scope::{ParserState, ScopeRef, ScopeTree};

struct CondFrame {
    any_branch_taken: bool,
    active: bool,
}

struct InlineCapture {
    path: String,
    contents: String,
}

/// Which open recipe the currently-accumulating lines belong to.
enum RecipeOwner {
    Targets(Vec<TargetId>),
    Rule(String, String),
}

pub struct Preprocessor<'a> {
    graph: &'a mut TargetGraph,
    scope_tree: &'a ScopeTree,
    cache: &'a mut PreprocessorCache,
    options: &'a Options,
    current_scope: ScopeRef,
    cond_stack: Vec<CondFrame>,
    owner: Option<RecipeOwner>,
    pending_recipe: Vec<RecipeStep>,
    inline_file: Option<InlineCapture>,
    default_goal: Option<TargetId>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        graph: &'a mut TargetGraph,
        scope_tree: &'a ScopeTree,
        cache: &'a mut PreprocessorCache,
        options: &'a Options,
    ) -> Self {
        let current_scope = scope_tree.root();
        Self {
            graph,
            scope_tree,
            cache,
            options,
            current_scope,
            cond_stack: vec![],
            owner: None,
            pending_recipe: vec![],
            inline_file: None,
            default_goal: None,
        }
    }

    /// Read every logical line from `lexer`, populating the graph and scope tree. Returns the
    /// first non-inference target declared, used as the default build goal when the command line
    /// names none (§4.3).
    pub fn run(&mut self, lexer: &mut Lexer) -> Result<Option<TargetId>, EngineError> {
        while let Some((raw_line, ctx)) = lexer.next_logical_line()? {
            let dir = lexer.current_dir();
            if dir != self.current_scope.path {
                self.current_scope = self.scope_tree.enter(&dir);
            }

            let trimmed = raw_line.trim();
            if trimmed.starts_with('!') {
                self.end_recipe(&ctx)?;
                self.handle_directive(&trimmed[1..], &ctx, lexer)?;
                continue;
            }

            if self.is_recipe_line(&raw_line) {
                self.handle_recipe_line(&raw_line, &ctx)?;
                continue;
            }

            self.end_recipe(&ctx)?;

            if trimmed.is_empty() {
                continue;
            }
            if !self.execution_enabled() {
                continue;
            }

            let expanded = self.expand_text(trimmed, &ctx)?;
            if let Some(pos) = find_rule_colon(&expanded) {
                self.handle_rule_line(&expanded, pos, &ctx)?;
            } else if let Some(pos) = find_unquoted(&expanded, '=') {
                self.handle_assignment_line(&expanded, pos, &ctx);
            } else {
                return Err(EngineError::syntax(
                    format!("unrecognized line: '{expanded}'"),
                    ctx,
                ));
            }
        }

        self.end_recipe(&lexer.current_context())?;
        if !self.cond_stack.is_empty() {
            return Err(EngineError::syntax(
                "unterminated '!if' (missing '!endif')",
                lexer.current_context(),
            ));
        }
        Ok(self.default_goal)
    }

    fn is_recipe_line(&self, raw_line: &str) -> bool {
        if self.current_scope.parser_state.get() == ParserState::Idle {
            return false;
        }
        // A blank line always terminates the recipe (§4.1 item 5), even when whitespace-only.
        if raw_line.trim().is_empty() {
            return false;
        }
        if self.scope_tree.has_recipe_prefix_override(&self.current_scope) {
            let prefix = self.scope_tree.recipe_prefix(&self.current_scope);
            raw_line.starts_with(prefix.as_str())
        } else {
            raw_line.starts_with(|c: char| c.is_whitespace())
        }
    }

    fn execution_enabled(&self) -> bool {
        self.cond_stack.iter().all(|f| f.active)
    }

    fn enclosing_active(&self) -> bool {
        let n = self.cond_stack.len();
        self.cond_stack[..n.saturating_sub(1)].iter().all(|f| f.active)
    }

    fn sync_scope_cond(&self) {
        self.current_scope.cond_depth.set(self.cond_stack.len());
        self.current_scope.recipes_enabled.set(self.execution_enabled());
    }

    fn expand_text(&self, s: &str, ctx: &Context) -> Result<String, EngineError> {
        let scope = self.current_scope.clone();
        expand::expand(s, &|n| self.scope_tree.lookup_var(&scope, n), None, ctx)
    }

    /// Flush any in-progress recipe into its owning target(s)/rule and return to idle state.
    fn end_recipe(&mut self, ctx: &Context) -> Result<(), EngineError> {
        if self.current_scope.parser_state.get() == ParserState::Idle {
            return Ok(());
        }
        if self.current_scope.parser_state.get() == ParserState::ReadingInlineFile {
            return Err(EngineError::syntax(
                "unterminated inline file (missing closing '<<')",
                ctx.clone(),
            ));
        }
        let recipe = std::mem::take(&mut self.pending_recipe);
        match self.owner.take() {
            Some(RecipeOwner::Targets(ids)) => {
                for id in ids {
                    self.graph.set_recipe(id, recipe.clone(), ctx)?;
                }
            }
            Some(RecipeOwner::Rule(src, dst)) => {
                if !recipe.is_empty() {
                    let rule_id = self.graph.add_inference_rule(InferenceRule {
                        source_suffix: src,
                        target_suffix: dst,
                        scope: self.current_scope.clone(),
                        recipe,
                    });
                    self.current_scope.rules.borrow_mut().push(rule_id);
                }
            }
            None => {}
        }
        self.current_scope.parser_state.set(ParserState::Idle);
        Ok(())
    }

    fn handle_recipe_line(&mut self, raw_line: &str, ctx: &Context) -> Result<(), EngineError> {
        let rest = if self.scope_tree.has_recipe_prefix_override(&self.current_scope) {
            let prefix = self.scope_tree.recipe_prefix(&self.current_scope);
            raw_line.strip_prefix(prefix.as_str()).unwrap_or(raw_line)
        } else {
            raw_line.trim_start()
        };

        match self.current_scope.parser_state.get() {
            ParserState::ReadingInlineFile => {
                if rest.trim_end() == "<<" {
                    self.current_scope.parser_state.set(ParserState::ReadingRecipe);
                    let inline = self
                        .inline_file
                        .take()
                        .expect("ReadingInlineFile implies inline_file is set");
                    self.pending_recipe.push(RecipeStep::WriteInlineFile {
                        path: inline.path,
                        contents: inline.contents,
                    });
                } else {
                    let inline = self
                        .inline_file
                        .as_mut()
                        .expect("ReadingInlineFile implies inline_file is set");
                    inline.contents.push_str(rest);
                    inline.contents.push('\n');
                }
            }
            _ => {
                let trimmed = rest.trim();
                if let Some(name) = trimmed.strip_prefix("<<") {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(EngineError::syntax(
                            "inline file directive needs a path after '<<'",
                            ctx.clone(),
                        ));
                    }
                    self.current_scope.parser_state.set(ParserState::ReadingInlineFile);
                    self.inline_file = Some(InlineCapture {
                        path: name.to_string(),
                        contents: String::new(),
                    });
                } else {
                    self.pending_recipe.push(RecipeStep::Run(RecipeLine::parse(rest)));
                }
            }
        }
        Ok(())
    }

    fn handle_rule_line(
        &mut self,
        line: &str,
        colon_pos: usize,
        ctx: &Context,
    ) -> Result<(), EngineError> {
        let lhs = line[..colon_pos].trim();
        let rhs = line[colon_pos + 1..].trim();

        if let Some((src, dst)) = inference_rule_pattern(lhs) {
            if !rhs.is_empty() {
                return Err(EngineError::syntax(
                    format!("inference rule '{lhs}' cannot declare dependencies"),
                    ctx.clone(),
                ));
            }
            self.owner = Some(RecipeOwner::Rule(src, dst));
            self.current_scope.parser_state.set(ParserState::ReadingRecipe);
            return Ok(());
        }

        let targets: Vec<&str> = lhs.split_whitespace().collect();
        if targets.is_empty() {
            return Err(EngineError::syntax("rule line has no target", ctx.clone()));
        }
        let deps: Vec<&str> = rhs.split_whitespace().collect();

        // `.PHONY: a b c` (§9 Open Questions: implementation-chosen phony-marking convention).
        if targets == [".PHONY"] {
            for dep in deps {
                let name = TargetGraph::normalize_name(dep, &self.current_scope.path);
                let id = self
                    .graph
                    .find(&name)
                    .unwrap_or_else(|| self.graph.get_or_create(name, dep, &self.current_scope, true));
                self.graph.mark_phony(id);
            }
            return Ok(());
        }

        let mut target_ids = vec![];
        for t in &targets {
            let name = TargetGraph::normalize_name(t, &self.current_scope.path);
            let id = self.graph.get_or_create(name, t, &self.current_scope, false);
            target_ids.push(id);

            if self.default_goal.is_none() {
                self.default_goal = Some(id);
            }

            for d in &deps {
                let dep_name = TargetGraph::normalize_name(d, &self.current_scope.path);
                let dep_id = self.graph.get_or_create(dep_name, d, &self.current_scope, false);
                self.graph.add_edge(id, dep_id);
            }
        }

        self.owner = Some(RecipeOwner::Targets(target_ids));
        self.current_scope.parser_state.set(ParserState::ReadingRecipe);
        Ok(())
    }

    fn handle_assignment_line(&mut self, line: &str, eq_pos: usize, _ctx: &Context) {
        let raw_lhs = line[..eq_pos].trim();
        let rhs = line[eq_pos + 1..].trim();

        let (name, append) = if let Some(n) = raw_lhs.strip_suffix('+') {
            (n.trim(), true)
        } else if let Some(n) = raw_lhs.strip_suffix('?') {
            let mut vars = self.current_scope.vars.borrow_mut();
            if vars.get_local(n.trim()).is_none() {
                vars.set(n.trim(), rhs, crate::vars::Precedence::Makefile);
            }
            return;
        } else {
            (raw_lhs, false)
        };

        let mut vars = self.current_scope.vars.borrow_mut();
        let value = if append {
            match vars.get_local(name) {
                Some(existing) if !existing.value.is_empty() => {
                    format!("{} {}", existing.value, rhs)
                }
                _ => rhs.to_string(),
            }
        } else {
            rhs.to_string()
        };
        vars.set(name, value, crate::vars::Precedence::Makefile);
    }

    fn handle_directive(
        &mut self,
        rest: &str,
        ctx: &Context,
        lexer: &mut Lexer,
    ) -> Result<(), EngineError> {
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((n, r)) => (n, r.trim()),
            None => (rest.trim(), ""),
        };

        match name {
            "include" => {
                if self.execution_enabled() {
                    let path = self.expand_text(arg, ctx)?;
                    lexer.push_include(lexer.current_dir().join(path))?;
                }
            }
            "cd" => {
                if self.execution_enabled() {
                    let dir_name = self.expand_text(arg, ctx)?;
                    let dir = lexer.current_dir().join(dir_name);
                    let makefile = crate::options::find_makefile(None, &dir).ok_or_else(|| {
                        EngineError::resource(
                            format!("no makefile found in '{}'", dir.display()),
                            ctx.clone(),
                        )
                    })?;
                    lexer.push_include(makefile)?;
                }
            }
            "if" => {
                let parent_active = self.execution_enabled();
                let cond = parent_active && self.eval_expr(arg, ctx)?;
                self.cond_stack.push(CondFrame {
                    any_branch_taken: cond,
                    active: cond,
                });
                self.sync_scope_cond();
            }
            "ifdef" => {
                let parent_active = self.execution_enabled();
                let cond = parent_active
                    && self.scope_tree.lookup_var(&self.current_scope, arg).is_some();
                self.cond_stack.push(CondFrame {
                    any_branch_taken: cond,
                    active: cond,
                });
                self.sync_scope_cond();
            }
            "ifndef" => {
                let parent_active = self.execution_enabled();
                let cond = parent_active
                    && self.scope_tree.lookup_var(&self.current_scope, arg).is_none();
                self.cond_stack.push(CondFrame {
                    any_branch_taken: cond,
                    active: cond,
                });
                self.sync_scope_cond();
            }
            "elseif" => {
                let parent_active = self.enclosing_active();
                let frame = self
                    .cond_stack
                    .last_mut()
                    .ok_or_else(|| EngineError::syntax("'!elseif' without '!if'", ctx.clone()))?;
                if frame.any_branch_taken || !parent_active {
                    frame.active = false;
                } else {
                    // Evaluated against the parent frame's state, not the already-closed branch.
                    let cond = self.eval_expr(arg, ctx)?;
                    let frame = self.cond_stack.last_mut().unwrap();
                    frame.active = cond;
                    frame.any_branch_taken = cond;
                }
                self.sync_scope_cond();
            }
            "else" => {
                let parent_active = self.enclosing_active();
                let frame = self
                    .cond_stack
                    .last_mut()
                    .ok_or_else(|| EngineError::syntax("'!else' without '!if'", ctx.clone()))?;
                frame.active = parent_active && !frame.any_branch_taken;
                frame.any_branch_taken = frame.any_branch_taken || frame.active;
                self.sync_scope_cond();
            }
            "endif" => {
                self.cond_stack
                    .pop()
                    .ok_or_else(|| EngineError::syntax("'!endif' without '!if'", ctx.clone()))?;
                self.sync_scope_cond();
            }
            "error" => {
                if self.execution_enabled() {
                    let msg = self.expand_text(arg, ctx)?;
                    return Err(EngineError::semantic(msg, ctx.clone()));
                }
            }
            "message" => {
                if self.execution_enabled() {
                    let msg = self.expand_text(arg, ctx)?;
                    crate::error::log_info(msg, Some(ctx));
                }
            }
            "undef" => {
                if self.execution_enabled() {
                    self.current_scope.vars.borrow_mut().undefine(arg);
                }
            }
            other => {
                return Err(EngineError::syntax(
                    format!("unrecognized directive '!{other}'"),
                    ctx.clone(),
                ));
            }
        }
        Ok(())
    }

    fn eval_expr(&mut self, text: &str, ctx: &Context) -> Result<bool, EngineError> {
        let tokens = tokenize(text, ctx)?;
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            pp: self,
            ctx,
        };
        let value = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(EngineError::syntax(
                format!("trailing tokens in conditional expression: '{text}'"),
                ctx.clone(),
            ));
        }
        Ok(value)
    }

    fn eval_backtick(&mut self, raw_command: &str, ctx: &Context) -> Result<String, EngineError> {
        let command = self.expand_text(raw_command, ctx)?;
        let tool_mtime = referenced_tool_mtime(&command);
        if let Some(entry) = self.cache.get(&command, tool_mtime) {
            debug!("preprocessor cache hit for '{command}'");
            return Ok(entry.stdout.trim().to_string());
        }
        let output = run_command(&command).map_err(|e| {
            EngineError::resource(format!("could not run '{command}' ({e})"), ctx.clone())
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let status = output.status.code().unwrap_or(-1);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if self.options.persistent_cache {
            self.cache.insert(command, stdout.clone(), status, now);
        }
        Ok(stdout.trim().to_string())
    }
}

/// Recognizes the `.SRC.DST` inference-rule pattern: a single token starting with `.`, containing
/// exactly two non-empty dot-separated parts.
fn inference_rule_pattern(lhs: &str) -> Option<(String, String)> {
    if lhs.split_whitespace().count() != 1 || !lhs.starts_with('.') {
        return None;
    }
    let rest = &lhs[1..];
    let dot = rest.find('.')?;
    let (src, dst) = (&rest[..dot], &rest[dot + 1..]);
    if src.is_empty() || dst.is_empty() || dst.contains('.') {
        return None;
    }
    Some((format!(".{src}"), format!(".{dst}")))
}

/// Find the first occurrence of `target` outside single/double-quoted regions.
fn find_unquoted(s: &str, target: char) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c == target && !in_single && !in_double => return Some(i),
            _ => {}
        }
    }
    None
}

/// Find the unquoted `:` that marks a rule line (§4.1 item 3): "contains an unquoted `:`
/// followed by whitespace". A colon at the very end of the line (a target with no dependencies,
/// e.g. `test:`) also counts, since there's nothing left for it to not be followed by. A colon
/// immediately followed by a non-whitespace character (e.g. the drive-letter colon in
/// `C:\mingw\bin\gcc.exe`) is not a rule separator and is skipped in favor of a later match, if
/// any.
fn find_rule_colon(s: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ':' if !in_single && !in_double => {
                let next = s[i + c.len_utf8()..].chars().next();
                if next.map_or(true, |nc| nc.is_whitespace()) {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort resolution of a backtick command's "referenced tool" (spec's cache-invalidation
/// rule: "if the referenced tool is newer than the entry, discard"): the command's first
/// whitespace-delimited token, if it names a file that exists on disk. A bare command name meant
/// to be resolved via `PATH` (no path separator) yields `None` — there's no entry to invalidate
/// against without spawning a process to resolve it, so the cache entry is trusted.
fn referenced_tool_mtime(command: &str) -> Option<SystemTime> {
    let tool = command.split_whitespace().next()?;
    if !tool.contains('/') && !tool.contains('\\') {
        return None;
    }
    std::fs::metadata(tool).ok()?.modified().ok()
}

#[cfg(unix)]
fn run_command(command: &str) -> std::io::Result<std::process::Output> {
    std::process::Command::new("/bin/sh").arg("-c").arg(command).output()
}

#[cfg(windows)]
fn run_command(command: &str) -> std::io::Result<std::process::Output> {
    std::process::Command::new("cmd").arg("/C").arg(command).output()
}

// --- `!if` expression tokenizer/parser -------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Word(String),
    Str(String),
    Backtick(String),
}

fn tokenize(text: &str, ctx: &Context) -> Result<Vec<Token>, EngineError> {
    let mut chars = text.chars().peekable();
    let mut tokens = vec![];
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(EngineError::syntax("expected '&&'", ctx.clone()));
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(EngineError::syntax("expected '||'", ctx.clone()));
                }
                tokens.push(Token::Or);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(EngineError::syntax("expected '=='", ctx.clone()));
                }
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '`' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(EngineError::syntax(
                                "unterminated backtick literal",
                                ctx.clone(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Backtick(s));
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(EngineError::syntax(
                                "unterminated string literal",
                                ctx.clone(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                tokens.push(Token::Word(scan_word(&mut chars)));
            }
        }
    }
    Ok(tokens)
}

fn scan_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c == '$' {
            s.push(c);
            chars.next();
            if let Some(&open) = chars.peek() {
                if open == '(' || open == '{' {
                    let close = if open == '(' { ')' } else { '}' };
                    s.push(open);
                    chars.next();
                    let mut depth = 1;
                    while depth > 0 {
                        match chars.next() {
                            Some(cc) => {
                                s.push(cc);
                                if cc == open {
                                    depth += 1;
                                } else if cc == close {
                                    depth -= 1;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            continue;
        }
        if c.is_whitespace() || "()!&|<>=\"`".contains(c) {
            break;
        }
        s.push(c);
        chars.next();
    }
    s
}

struct ExprParser<'p, 'a> {
    tokens: Vec<Token>,
    pos: usize,
    pp: &'p mut Preprocessor<'a>,
    ctx: &'p Context,
}

impl ExprParser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<bool, EngineError> {
        let mut v = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            v = v || rhs;
        }
        Ok(v)
    }

    fn parse_and(&mut self) -> Result<bool, EngineError> {
        let mut v = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            v = v && rhs;
        }
        Ok(v)
    }

    fn parse_not(&mut self) -> Result<bool, EngineError> {
        if self.eat(&Token::Not) {
            Ok(!self.parse_not()?)
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<bool, EngineError> {
        if self.eat(&Token::LParen) {
            let v = self.parse_or()?;
            if !self.eat(&Token::RParen) {
                return Err(EngineError::syntax("expected ')'", self.ctx.clone()));
            }
            return Ok(v);
        }

        if let Some(Token::Word(w)) = self.peek() {
            if w == "defined" {
                self.next();
                if !self.eat(&Token::LParen) {
                    return Err(EngineError::syntax(
                        "expected '(' after 'defined'",
                        self.ctx.clone(),
                    ));
                }
                let name = match self.next() {
                    Some(Token::Word(n)) => n,
                    _ => {
                        return Err(EngineError::syntax(
                            "expected a variable name in 'defined(...)'",
                            self.ctx.clone(),
                        ))
                    }
                };
                if !self.eat(&Token::RParen) {
                    return Err(EngineError::syntax("expected ')'", self.ctx.clone()));
                }
                return Ok(self
                    .pp
                    .scope_tree
                    .lookup_var(&self.pp.current_scope, &name)
                    .is_some());
            }
        }

        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(Token::Eq),
            Some(Token::Ne) => Some(Token::Ne),
            Some(Token::Le) => Some(Token::Le),
            Some(Token::Ge) => Some(Token::Ge),
            Some(Token::Lt) => Some(Token::Lt),
            Some(Token::Gt) => Some(Token::Gt),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let rhs = self.parse_operand()?;
            return Ok(compare(&lhs, &op, &rhs));
        }
        Ok(!lhs.is_empty() && lhs != "0")
    }

    fn parse_operand(&mut self) -> Result<String, EngineError> {
        match self.next() {
            Some(Token::Word(w)) => self.pp.expand_text(&w, self.ctx),
            Some(Token::Str(s)) => self.pp.expand_text(&s, self.ctx),
            Some(Token::Backtick(cmd)) => self.pp.eval_backtick(&cmd, self.ctx),
            _ => Err(EngineError::syntax(
                "expected a value in conditional expression",
                self.ctx.clone(),
            )),
        }
    }
}

fn compare(lhs: &str, op: &Token, rhs: &str) -> bool {
    if let (Ok(l), Ok(r)) = (lhs.parse::<i64>(), rhs.parse::<i64>()) {
        return match op {
            Token::Eq => l == r,
            Token::Ne => l != r,
            Token::Le => l <= r,
            Token::Ge => l >= r,
            Token::Lt => l < r,
            Token::Gt => l > r,
            _ => false,
        };
    }
    match op {
        Token::Eq => lhs == rhs,
        Token::Ne => lhs != rhs,
        Token::Le => lhs <= rhs,
        Token::Ge => lhs >= rhs,
        Token::Lt => lhs < rhs,
        Token::Gt => lhs > rhs,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn run_source(src: &str) -> (TargetGraph, ScopeTree, Option<TargetId>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Makefile");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(src.as_bytes()).unwrap();

        let mut graph = TargetGraph::new();
        let scope_tree = ScopeTree::new(dir.path().to_path_buf());
        let mut cache = PreprocessorCache::disabled();
        let options = Options::default();
        let mut lexer = Lexer::new(path).unwrap();
        let goal = {
            let mut pp = Preprocessor::new(&mut graph, &scope_tree, &mut cache, &options);
            pp.run(&mut lexer).unwrap()
        };
        (graph, scope_tree, goal)
    }

    #[test]
    fn simple_rule_and_recipe() {
        let (graph, _tree, goal) = run_source("all:\n\techo hi\n");
        let id = goal.unwrap();
        assert_eq!(graph.target(id).recipe.len(), 1);
    }

    #[test]
    fn conditional_variable_is_visible_after_ifdef() {
        let (graph, tree, goal) =
            run_source("X = hello\n!ifdef X\nY = $(X) world\n!endif\nall:\n\techo $(Y)\n");
        let id = goal.unwrap();
        let scope = graph.target(id).scope.clone();
        assert_eq!(tree.lookup_var(&scope, "Y").unwrap(), "hello world");
    }

    #[test]
    fn else_branch_runs_when_if_is_false() {
        let (_graph, tree, goal) =
            run_source("!if 0\nY = a\n!else\nY = b\n!endif\nall:\n\techo hi\n");
        let scope = _graph.target(goal.unwrap()).scope.clone();
        assert_eq!(tree.lookup_var(&scope, "Y").unwrap(), "b");
    }

    #[test]
    fn dependency_edges_are_recorded_in_order() {
        let (graph, _tree, goal) =
            run_source("all: a.o b.o\n\techo link\na.o:\n\techo a\nb.o:\n\techo b\n");
        let all = goal.unwrap();
        let deps: Vec<String> = graph
            .target(all)
            .out_edges
            .iter()
            .map(|&e| graph.target(graph.edge(e).child).display_name.clone())
            .collect();
        assert_eq!(deps, vec!["a.o", "b.o"]);
    }

    #[test]
    fn phony_directive_marks_targets() {
        let (graph, _tree, goal) = run_source(".PHONY: all\nall:\n\techo hi\n");
        assert!(graph.target(goal.unwrap()).is_phony);
    }

    #[test]
    fn assignment_value_containing_an_unspaced_colon_is_not_a_rule_line() {
        // `C:\mingw\bin\gcc.exe`'s first unquoted `:` is not followed by whitespace, so this
        // must parse as an assignment, not a rule with bogus targets `CC`/`=`/`C`.
        let (graph, tree, goal) = run_source(
            "CC = C:\\mingw\\bin\\gcc.exe\nall:\n\techo $(CC)\n",
        );
        let id = goal.unwrap();
        let scope = graph.target(id).scope.clone();
        assert_eq!(tree.lookup_var(&scope, "CC").unwrap(), "C:\\mingw\\bin\\gcc.exe");
    }

    #[test]
    fn space_indented_recipe_line_is_recognized_without_recipeprefix_override() {
        let (graph, _tree, goal) = run_source("all:\n    echo hi\n");
        let id = goal.unwrap();
        assert_eq!(graph.target(id).recipe.len(), 1);
    }

    #[test]
    fn cyclic_if_without_endif_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Makefile");
        std::fs::write(&path, "!if 1\nall:\n\techo hi\n").unwrap();
        let mut graph = TargetGraph::new();
        let scope_tree = ScopeTree::new(dir.path().to_path_buf());
        let mut cache = PreprocessorCache::disabled();
        let options = Options::default();
        let mut lexer = Lexer::new(path).unwrap();
        let mut pp = Preprocessor::new(&mut graph, &scope_tree, &mut cache, &options);
        assert!(pp.run(&mut lexer).is_err());
    }

    #[test]
    fn referenced_tool_mtime_resolves_a_path_but_not_a_bare_command_name() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("probe.sh");
        std::fs::write(&tool, "#!/bin/sh\necho hi\n").unwrap();
        let command = format!("{} --flag", tool.display());
        assert!(referenced_tool_mtime(&command).is_some());
        assert!(referenced_tool_mtime("pkg-config --exists foo").is_none());
    }

    #[test]
    fn expr_integer_comparison() {
        assert!(compare("2", &Token::Gt, "1"));
        assert!(!compare("2", &Token::Lt, "1"));
        assert!(compare("a", &Token::Eq, "a"));
    }

    #[test]
    fn inference_rule_pattern_matches_two_suffixes() {
        assert_eq!(
            inference_rule_pattern(".c.o"),
            Some((".c".to_string(), ".o".to_string()))
        );
        assert_eq!(inference_rule_pattern("all"), None);
        assert_eq!(inference_rule_pattern(".c.o.x"), None);
    }
}
