//! Dependency resolver (§4.3): walks requested targets, applies inference rules, probes
//! timestamps, and computes which targets are stale and ready to schedule.

use std::collections::HashSet;
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::EngineError;
use crate::graph::{SchedState, TargetGraph, TargetId};
use crate::options::Options;
use crate::scope::ScopeTree;

/// Walk every root, applying inference rules, detecting cycles, then compute staleness and the
/// initial Ready queue bottom-up. Returns the targets now in state `Ready`.
pub fn resolve(
    graph: &mut TargetGraph,
    scope_tree: &ScopeTree,
    roots: &[TargetId],
    options: &Options,
) -> Result<Vec<TargetId>, EngineError> {
    let mut path = vec![];
    let mut on_path = HashSet::new();
    let mut visited = HashSet::new();
    let mut order = vec![];

    for &root in roots {
        walk(
            graph,
            scope_tree,
            root,
            &mut path,
            &mut on_path,
            &mut visited,
            &mut order,
        )?;
    }

    for id in order.iter().copied() {
        resolve_one(graph, id, options);
    }

    let mut ready = vec![];
    for id in order.iter().copied() {
        let t = graph.target(id);
        if t.state == SchedState::Pending && t.unfinished_dependencies == 0 {
            graph.target_mut(id).state = SchedState::Ready;
            ready.push(id);
        }
    }
    Ok(ready)
}

/// Depth-first walk with cycle detection (§4.3.2) and inference-rule application (§4.3.1),
/// producing a dependency-first (`children before parents`) traversal order.
fn walk(
    graph: &mut TargetGraph,
    scope_tree: &ScopeTree,
    id: TargetId,
    path: &mut Vec<TargetId>,
    on_path: &mut HashSet<TargetId>,
    visited: &mut HashSet<TargetId>,
    order: &mut Vec<TargetId>,
) -> Result<(), EngineError> {
    if visited.contains(&id) {
        return Ok(());
    }
    if on_path.contains(&id) {
        let cycle_start = path.iter().position(|&p| p == id).unwrap_or(0);
        let names: Vec<String> = path[cycle_start..]
            .iter()
            .map(|&p| graph.target(p).display_name.clone())
            .collect();
        return Err(EngineError::semantic(
            format!(
                "circular dependency: {} -> {}",
                names.join(" -> "),
                graph.target(id).display_name
            ),
            graph.target(id).context.clone(),
        ));
    }

    apply_inference_rule(graph, scope_tree, id)?;

    // A target with no recipe, no dependencies, and no inference rule is only valid if it's an
    // existing file (a plain source file with nothing to build); otherwise §7's "no rule to
    // build a demanded target" applies.
    let t = graph.target(id);
    if !t.explicit_recipe_found
        && t.out_edges.is_empty()
        && !t.is_phony
        && !std::path::Path::new(&t.name).is_file()
    {
        return Err(EngineError::semantic(
            format!("no rule to make target '{}'", t.display_name),
            t.context.clone(),
        ));
    }

    path.push(id);
    on_path.insert(id);

    let children: Vec<TargetId> = graph
        .target(id)
        .out_edges
        .iter()
        .map(|&e| graph.edge(e).child)
        .collect();
    for child in children {
        walk(graph, scope_tree, child, path, on_path, visited, order)?;
    }

    path.pop();
    on_path.remove(&id);
    visited.insert(id);
    order.push(id);
    Ok(())
}

/// §4.2 Inference-rule matching: supply a recipe (and a single dependency edge) to a target that
/// has neither, by matching its name against a visible `.SRC.DST` rule.
fn apply_inference_rule(
    graph: &mut TargetGraph,
    scope_tree: &ScopeTree,
    id: TargetId,
) -> Result<(), EngineError> {
    let target = graph.target(id);
    if target.explicit_recipe_found || !target.out_edges.is_empty() || target.is_phony {
        return Ok(());
    }
    let scope = target.scope.clone();
    let dir = scope.path.clone();
    let base_name = std::path::Path::new(&target.name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.name.clone());

    let candidates = scope_tree.visible_rules(&scope);
    let Some((rule_id, candidate_path)) = graph.match_inference_rule(&base_name, &dir, &candidates)
    else {
        return Ok(());
    };

    let dep_name = TargetGraph::normalize_path(&candidate_path);
    let dep_display = candidate_path.to_string_lossy().into_owned();
    let dep_id = graph.get_or_create(dep_name, &dep_display, &scope, false);
    graph.add_edge(id, dep_id);

    let recipe = graph.rule(rule_id).recipe.clone();
    let context = graph.target(id).context.clone();
    graph.set_recipe(id, recipe, &context)?;
    graph.target_mut(id).rule_source = Some(rule_id);
    Ok(())
}

/// Probe a file's mtime, honoring `-o`/`-n` (§6): old files read as `UNIX_EPOCH`, new files read
/// as one year in the future. `None` means "does not exist" (or is inaccessible).
pub fn probe_mtime(file: &str, options: &Options) -> Option<SystemTime> {
    if options.old_file.iter().any(|f| f == file) {
        return Some(UNIX_EPOCH);
    }
    match fs::metadata(file) {
        Ok(metadata) => {
            if options.new_file.iter().any(|f| f == file) {
                Some(SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60))
            } else {
                metadata.modified().ok()
            }
        }
        Err(_) => None,
    }
}

/// Compute staleness (§4.3.3), the unfinished-dependency count (invariant (c)), and prune
/// targets that need no action (§4.3.4 / Boundaries: "recipe with 0 lines...performs no
/// action"). Must run in dependency-first order so each target's children are already resolved.
fn resolve_one(graph: &mut TargetGraph, id: TargetId, options: &Options) {
    let is_phony = graph.target(id).is_phony;
    let mtime = if is_phony {
        None
    } else {
        probe_mtime(&graph.target(id).name, options)
    };
    graph.target_mut(id).mtime = mtime;

    let child_ids: Vec<TargetId> = graph
        .target(id)
        .out_edges
        .iter()
        .map(|&e| graph.edge(e).child)
        .collect();

    // `-o FILE`: treat FILE as unconditionally up to date and never remake it, regardless of
    // dependency staleness (§6).
    let is_old_file = options.old_file.iter().any(|f| f == &graph.target(id).name);

    let stale = if is_old_file {
        false
    } else {
        let mut stale = is_phony || mtime.is_none() || options.always_make;
        for &child in &child_ids {
            let c = graph.target(child);
            if c.stale {
                stale = true;
            }
            if let (Some(cm), Some(tm)) = (c.mtime, mtime) {
                if cm > tm {
                    stale = true;
                }
            }
        }
        stale
    };
    graph.target_mut(id).stale = stale;

    let unfinished = child_ids
        .iter()
        .filter(|&&c| graph.target(c).state != SchedState::FinishedSuccess)
        .count();
    graph.target_mut(id).unfinished_dependencies = unfinished;

    if unfinished == 0 && (graph.target(id).recipe.is_empty() || !stale) {
        graph.target_mut(id).state = SchedState::FinishedSuccess;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::graph::{RecipeLine, RecipeStep};
    use crate::scope::ScopeTree;

    #[test]
    fn cycle_is_detected() {
        let tree = ScopeTree::new(std::env::temp_dir());
        let mut graph = TargetGraph::new();
        let s = tree.root();
        let a = graph.get_or_create("a".into(), "a", &s, true);
        let b = graph.get_or_create("b".into(), "b", &s, true);
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        let options = Options::default();
        let err = resolve(&mut graph, &tree, &[a], &options).unwrap_err();
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn phony_targets_with_no_recipe_are_pruned_immediately() {
        let tree = ScopeTree::new(std::env::temp_dir());
        let mut graph = TargetGraph::new();
        let s = tree.root();
        let all = graph.get_or_create("all".into(), "all", &s, true);
        let a = graph.get_or_create("a".into(), "a", &s, true);
        graph.add_edge(all, a);
        graph
            .set_recipe(
                a,
                vec![RecipeStep::Run(RecipeLine::parse("echo a"))],
                &Context::new(),
            )
            .unwrap();

        let options = Options::default();
        let ready = resolve(&mut graph, &tree, &[all], &options).unwrap();
        // `a` is stale (phony) and has a recipe, so it must run; `all` has no recipe and is
        // blocked on `a`, so it is not ready yet.
        assert_eq!(ready, vec![a]);
        assert_eq!(graph.target(all).state, SchedState::Pending);
    }
}
