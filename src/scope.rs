//! Hierarchical scope tree (§3 Scope): one scope per directory whose makefile is being (or was)
//! processed, caching variables, inference rules, and a parser state.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::vars::VarTable;

/// Parser state for a scope's currently-open rule definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    ReadingRecipe,
    ReadingInlineFile,
}

/// A directory-aligned container of variables and inference rules. Scopes are reference-counted
/// (shared via `Rc`) and persist for the engine's lifetime once created, per §3/§9: targets in
/// descendant scopes still need to resolve inference rules declared in an ancestor's scope.
#[derive(Debug)]
pub struct Scope {
    /// Canonical absolute directory path; immutable identity.
    pub path: PathBuf,
    pub parent: Option<ScopeRef>,
    /// Previous scope on the processing stack (set while actively reading this scope's
    /// makefile, following an `!include` or scope-entry directive); used to return control.
    pub previous: RefCell<Option<ScopeRef>>,
    pub vars: RefCell<VarTable>,
    /// Inference rules declared directly in this scope, in declaration order.
    pub rules: RefCell<Vec<crate::graph::RuleId>>,
    /// Whether recipes at the current conditional nesting level execute (i.e., whether we are
    /// inside only `true` conditional branches).
    pub recipes_enabled: Cell<bool>,
    pub cond_depth: Cell<usize>,
    pub parser_state: Cell<ParserState>,
}

pub type ScopeRef = Rc<Scope>;

impl Scope {
    fn new(path: PathBuf, parent: Option<ScopeRef>) -> ScopeRef {
        Rc::new(Scope {
            path,
            parent,
            previous: RefCell::new(None),
            vars: RefCell::new(VarTable::new()),
            rules: RefCell::new(vec![]),
            recipes_enabled: Cell::new(true),
            cond_depth: Cell::new(0),
            parser_state: Cell::new(ParserState::Idle),
        })
    }
}

/// Owns every [`Scope`] created during a run, keyed by canonical directory path so re-entering a
/// directory finds the existing scope rather than creating a duplicate.
#[derive(Debug)]
pub struct ScopeTree {
    scopes: RefCell<HashMap<PathBuf, ScopeRef>>,
    root: ScopeRef,
}

impl ScopeTree {
    pub fn new(root_dir: PathBuf) -> Self {
        let root = Scope::new(root_dir.clone(), None);
        let mut scopes = HashMap::new();
        scopes.insert(root_dir, root.clone());
        Self {
            scopes: RefCell::new(scopes),
            root,
        }
    }

    pub fn root(&self) -> ScopeRef {
        self.root.clone()
    }

    /// Get the existing scope for `dir`, or create one, parented to the nearest ancestor
    /// directory that already has a scope (falling back to the root).
    pub fn enter(&self, dir: &Path) -> ScopeRef {
        if let Some(existing) = self.scopes.borrow().get(dir) {
            return existing.clone();
        }

        let parent = self.nearest_ancestor_scope(dir);
        let scope = Scope::new(dir.to_path_buf(), Some(parent));
        self.scopes
            .borrow_mut()
            .insert(dir.to_path_buf(), scope.clone());
        scope
    }

    fn nearest_ancestor_scope(&self, dir: &Path) -> ScopeRef {
        let scopes = self.scopes.borrow();
        let mut cur = dir.parent();
        while let Some(p) = cur {
            if let Some(scope) = scopes.get(p) {
                return scope.clone();
            }
            cur = p.parent();
        }
        self.root.clone()
    }

    /// Walk from `scope` toward the root, returning the value of the first ancestor (inclusive)
    /// whose table defines `name` (testable property 2: "shallower definition wins").
    pub fn lookup_var(&self, scope: &ScopeRef, name: &str) -> Option<String> {
        let mut cur = Some(scope.clone());
        while let Some(s) = cur {
            if let Some(var) = s.vars.borrow().get_local(name) {
                return Some(var.value.clone());
            }
            cur = s.parent.clone();
        }
        None
    }

    /// Whether `scope` (or an ancestor) has an explicit `.RECIPEPREFIX` override. When `false`,
    /// a recipe line is recognized by any leading whitespace (§4.1 "begins with whitespace"),
    /// not by the literal default-tab string `recipe_prefix` falls back to.
    pub fn has_recipe_prefix_override(&self, scope: &ScopeRef) -> bool {
        let mut cur = Some(scope.clone());
        while let Some(s) = cur {
            if s.vars.borrow().get_local(".RECIPEPREFIX").is_some() {
                return true;
            }
            cur = s.parent.clone();
        }
        false
    }

    /// Same walk, but for the effective recipe prefix, which always has a default.
    pub fn recipe_prefix(&self, scope: &ScopeRef) -> String {
        let mut cur = Some(scope.clone());
        while let Some(s) = cur {
            if s.vars.borrow().get_local(".RECIPEPREFIX").is_some() {
                return s.vars.borrow().recipe_prefix().to_string();
            }
            cur = s.parent.clone();
        }
        crate::vars::DEFAULT_RECIPE_PREFIX.to_string()
    }

    /// All inference rules visible from `scope`: this scope's rules first (closest scope wins
    /// per §4.2), then each ancestor's, outermost last.
    pub fn visible_rules(&self, scope: &ScopeRef) -> Vec<crate::graph::RuleId> {
        let mut out = vec![];
        let mut cur = Some(scope.clone());
        while let Some(s) = cur {
            out.extend(s.rules.borrow().iter().copied());
            cur = s.parent.clone();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentering_a_directory_returns_the_cached_scope() {
        let tree = ScopeTree::new(PathBuf::from("/root"));
        let a = tree.enter(Path::new("/root/a"));
        let b = tree.enter(Path::new("/root/a"));
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn child_scope_shadows_parent_variable() {
        let tree = ScopeTree::new(PathBuf::from("/root"));
        tree.root().vars.borrow_mut().set(
            "X",
            "parent",
            crate::vars::Precedence::Makefile,
        );
        let child = tree.enter(Path::new("/root/sub"));
        assert_eq!(tree.lookup_var(&child, "X").unwrap(), "parent");

        child
            .vars
            .borrow_mut()
            .set("X", "child", crate::vars::Precedence::Makefile);
        assert_eq!(tree.lookup_var(&child, "X").unwrap(), "child");
        assert_eq!(tree.lookup_var(&tree.root(), "X").unwrap(), "parent");
    }
}
