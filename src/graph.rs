//! The target/dependency graph (§3 Target, Dependency edge, Inference rule; §4.2).
//!
//! Targets, edges, and inference rules are arena-allocated (`Vec`-backed, referenced by index)
//! per the design notes' recommendation: "an arena where scopes and targets are index-allocated
//! and live for the engine's lifetime...simplifies reasoning and avoids cycles entirely since
//! edges become indices." Parent/child back-pointers (incoming edges) are therefore just more
//! indices into the same arena, not owning references, so the inherent parent<->child cycle in
//! the data never becomes a Rust ownership cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::context::Context;
use crate::error::EngineError;
use crate::scope::ScopeRef;

pub type TargetId = usize;
pub type EdgeId = usize;
pub type RuleId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedState {
    Pending,
    Ready,
    Running,
    FinishedSuccess,
    FinishedFailure,
}

/// One recipe line, preserving the `@` (suppress echo) and `-` (tolerate failure) prefixes from
/// §4.4 Recipe execution.
#[derive(Debug, Clone)]
pub struct RecipeLine {
    pub text: String,
    pub suppress_echo: bool,
    pub tolerate_failure: bool,
}

/// A step of a target's recipe: either a command line, or an inline (heredoc-style) file to
/// materialize before the next command runs (§4.4 "Inline files").
#[derive(Debug, Clone)]
pub enum RecipeStep {
    Run(RecipeLine),
    WriteInlineFile { path: String, contents: String },
}

impl RecipeLine {
    pub fn parse(raw: &str) -> Self {
        let mut suppress_echo = false;
        let mut tolerate_failure = false;
        let mut rest = raw.trim_start();
        loop {
            match rest.chars().next() {
                Some('@') if !suppress_echo => {
                    suppress_echo = true;
                    rest = &rest[1..];
                }
                Some('-') if !tolerate_failure => {
                    tolerate_failure = true;
                    rest = &rest[1..];
                }
                _ => break,
            }
        }
        Self {
            text: rest.to_string(),
            suppress_echo,
            tolerate_failure,
        }
    }
}

/// §3 Target.
#[derive(Debug)]
pub struct Target {
    /// Canonical normalized name (absolute, case-folded path for file targets); serves as
    /// identity/hashmap key within the graph.
    pub name: String,
    /// The name as written in the makefile or on the command line; used for `$@`/`$*` and
    /// user-facing messages, where an absolute path would be noisy.
    pub display_name: String,
    pub scope: ScopeRef,
    pub is_phony: bool,
    pub explicit_recipe_found: bool,
    pub recipe: Vec<RecipeStep>,
    /// Outgoing parent->dependency edges, in declaration order (`$**`/`$?` need this order).
    pub out_edges: Vec<EdgeId>,
    /// Weak (non-owning) incoming set: edges where this target is the child.
    pub in_edges: Vec<EdgeId>,
    pub mtime: Option<SystemTime>,
    /// Computed by the resolver (§4.3.3); meaningless before resolution has run.
    pub stale: bool,
    pub state: SchedState,
    /// The number of outgoing edges whose child is not yet `FinishedSuccess` (invariant (c)).
    /// Named for the invariant it satisfies rather than spec §3's "unfinished parents" label,
    /// which describes this exact counter despite the name (see DESIGN.md).
    pub unfinished_dependencies: usize,
    pub rule_source: Option<RuleId>,
    pub context: Context,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub parent: TargetId,
    pub child: TargetId,
}

/// §3 Inference rule / §4.2 Inference-rule matching.
#[derive(Debug)]
pub struct InferenceRule {
    pub source_suffix: String,
    pub target_suffix: String,
    pub scope: ScopeRef,
    pub recipe: Vec<RecipeStep>,
}

/// Owns every target, edge, and inference rule for one engine run.
#[derive(Debug, Default)]
pub struct TargetGraph {
    targets: Vec<Target>,
    by_name: HashMap<String, TargetId>,
    edges: Vec<Edge>,
    rules: Vec<InferenceRule>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id]
    }

    pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
        &mut self.targets[id]
    }

    pub fn edge(&self, id: EdgeId) -> Edge {
        self.edges[id]
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn find(&self, name: &str) -> Option<TargetId> {
        self.by_name.get(name).copied()
    }

    /// Case-fold an already-absolute path on case-insensitive filesystems.
    pub fn normalize_path(path: &std::path::Path) -> String {
        let display = path.to_string_lossy().into_owned();
        if cfg!(any(windows, target_os = "macos")) {
            display.to_lowercase()
        } else {
            display
        }
    }

    /// Normalize a target name to an absolute, case-folded (on case-insensitive filesystems)
    /// path for file targets, per §4.2. Phony/pseudo targets are marked explicitly by the
    /// caller (via `.PHONY`) rather than by shape of the name; they still get a (non-existent)
    /// joined path here so lookups stay consistent.
    pub fn normalize_name(name: &str, scope_dir: &std::path::Path) -> String {
        Self::normalize_path(&scope_dir.join(name))
    }

    /// Get or create the target named `name` (already normalized by the caller) in `scope`.
    /// `display_name` is the literal text as written and is kept only on first creation.
    pub fn get_or_create(
        &mut self,
        name: String,
        display_name: &str,
        scope: &ScopeRef,
        is_phony: bool,
    ) -> TargetId {
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = self.targets.len();
        self.targets.push(Target {
            name: name.clone(),
            display_name: display_name.to_string(),
            scope: scope.clone(),
            is_phony,
            explicit_recipe_found: false,
            recipe: vec![],
            out_edges: vec![],
            in_edges: vec![],
            mtime: None,
            stale: false,
            state: SchedState::Pending,
            unfinished_dependencies: 0,
            rule_source: None,
            context: Context::new(),
        });
        self.by_name.insert(name, id);
        id
    }

    /// Mark an existing target phony, for the `.PHONY: ...` convention (§9 Open Questions).
    pub fn mark_phony(&mut self, id: TargetId) {
        self.targets[id].is_phony = true;
    }

    /// Add an outgoing edge `parent -> child`, skipping duplicates (§4.2: "subsequent rule lines
    /// for the same target append further edges (never duplicating)").
    pub fn add_edge(&mut self, parent: TargetId, child: TargetId) {
        let already_present = self.targets[parent]
            .out_edges
            .iter()
            .any(|&e| self.edges[e].child == child);
        if already_present {
            return;
        }
        let id = self.edges.len();
        self.edges.push(Edge { parent, child });
        self.targets[parent].out_edges.push(id);
        self.targets[child].in_edges.push(id);
    }

    /// Set a target's recipe. The first non-empty recipe wins; a second attempt to assign one is
    /// an error (§4.2).
    pub fn set_recipe(
        &mut self,
        id: TargetId,
        recipe: Vec<RecipeStep>,
        context: &Context,
    ) -> Result<(), EngineError> {
        let target = &mut self.targets[id];
        if recipe.is_empty() {
            return Ok(());
        }
        if target.explicit_recipe_found {
            return Err(EngineError::semantic(
                format!("recipe for target '{}' defined more than once", target.name),
                context.clone(),
            ));
        }
        target.recipe = recipe;
        target.explicit_recipe_found = true;
        target.context = context.clone();
        Ok(())
    }

    pub fn add_inference_rule(&mut self, rule: InferenceRule) -> RuleId {
        let id = self.rules.len();
        self.rules.push(rule);
        id
    }

    pub fn rule(&self, id: RuleId) -> &InferenceRule {
        &self.rules[id]
    }

    /// §4.2 Inference-rule matching: `candidate_rules` is the ordered (closest-scope-first,
    /// declaration-order) list of rule ids visible from the target's scope (supplied by the
    /// caller via [`crate::scope::ScopeTree::visible_rules`]). Returns the first rule whose
    /// target suffix matches `target_name` and whose substituted dependency exists, either as a
    /// file under `dir` or as another known target.
    pub fn match_inference_rule(
        &self,
        target_name: &str,
        dir: &std::path::Path,
        candidate_rules: &[RuleId],
    ) -> Option<(RuleId, PathBuf)> {
        for &rule_id in candidate_rules {
            let rule = &self.rules[rule_id];
            if rule.target_suffix.is_empty() || !target_name.ends_with(&rule.target_suffix) {
                continue;
            }
            let stem = &target_name[..target_name.len() - rule.target_suffix.len()];
            let candidate_name = format!("{stem}{}", rule.source_suffix);
            let candidate_path = dir.join(&candidate_name);
            let candidate_normalized = Self::normalize_path(&candidate_path);
            if candidate_path.is_file() || self.by_name.contains_key(&candidate_normalized) {
                return Some((rule_id, candidate_path));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeTree;

    fn scope() -> ScopeRef {
        ScopeTree::new(std::env::temp_dir()).root()
    }

    #[test]
    fn duplicate_edges_are_not_added_twice() {
        let mut graph = TargetGraph::new();
        let s = scope();
        let a = graph.get_or_create("a".into(), "a", &s, true);
        let b = graph.get_or_create("b".into(), "b", &s, true);
        graph.add_edge(a, b);
        graph.add_edge(a, b);
        assert_eq!(graph.target(a).out_edges.len(), 1);
        assert_eq!(graph.target(b).in_edges.len(), 1);
    }

    #[test]
    fn second_recipe_assignment_is_an_error() {
        let mut graph = TargetGraph::new();
        let s = scope();
        let a = graph.get_or_create("a".into(), "a", &s, true);
        let ctx = Context::new();
        graph
            .set_recipe(a, vec![RecipeStep::Run(RecipeLine::parse("echo one"))], &ctx)
            .unwrap();
        let err = graph
            .set_recipe(a, vec![RecipeStep::Run(RecipeLine::parse("echo two"))], &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn recipe_line_prefixes_are_parsed() {
        let line = RecipeLine::parse("@-echo hi");
        assert!(line.suppress_echo);
        assert!(line.tolerate_failure);
        assert_eq!(line.text, "echo hi");
    }
}
