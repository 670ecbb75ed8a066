//! Parallel execution scheduler (§4.4): a Ready/Running/Finished queue over the target graph,
//! dispatching one worker-process-lifecycle thread per running target.
//!
//! The design notes call for "a thread per child process, each blocking on its own wait and
//! reporting completion through a channel" as the portable stand-in for a native multi-handle
//! wait; everything that actually touches the graph runs on the scheduler's own thread, so the
//! worker threads are pure I/O: they spawn a shell, wait for it, and send the outcome back.

use std::collections::VecDeque;
use std::process::Command;
use std::sync::mpsc;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::time::Instant;

use log::{debug, trace};

use crate::context::Context;
use crate::error::EngineError;
use crate::expand::{self, RecipeVars};
use crate::graph::{EdgeId, RecipeStep, SchedState, TargetGraph, TargetId};
use crate::options::Options;
use crate::scope::ScopeTree;

struct WorkerResult {
    target: TargetId,
    outcome: Result<bool, EngineError>,
}

/// A recipe step with its text already expanded, ready to run without touching the graph.
enum ExpandedStep {
    Run {
        suppress_echo: bool,
        tolerate_failure: bool,
        command: String,
    },
    WriteFile {
        path: String,
        contents: String,
    },
}

/// Run one target's fully-expanded recipe sequentially, stopping at the first untolerated
/// failure. Paths written by `WriteFile` steps are appended to `materialized` so the caller can
/// clean them up regardless of outcome.
fn run_steps(
    steps: Result<Vec<ExpandedStep>, EngineError>,
    ctx: &Context,
    silent: bool,
    just_print: bool,
    cancelled: &AtomicBool,
    materialized: &mut Vec<String>,
) -> Result<bool, EngineError> {
    let steps = steps?;
    if steps.is_empty() {
        return Ok(false);
    }
    let mut ran_a_command = false;
    for step in &steps {
        if cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::cancelled());
        }
        match step {
            ExpandedStep::WriteFile { path, contents } => {
                std::fs::write(path, contents).map_err(|e| {
                    EngineError::resource(
                        format!("could not write inline file '{path}' ({e})"),
                        ctx.clone(),
                    )
                })?;
                materialized.push(path.clone());
            }
            ExpandedStep::Run {
                suppress_echo,
                tolerate_failure,
                command,
            } => {
                if !silent && !suppress_echo {
                    println!("{command}");
                }
                if just_print {
                    continue;
                }
                ran_a_command = true;
                let status = run_one(command).map_err(|e| {
                    EngineError::resource(format!("could not run '{command}' ({e})"), ctx.clone())
                })?;
                if !status.success() && !tolerate_failure {
                    let code = status.code().unwrap_or(-1);
                    return Err(EngineError::command(
                        format!("command '{command}' exited with status {code}"),
                        ctx.clone(),
                    ));
                }
            }
        }
    }
    Ok(ran_a_command)
}

/// Drives targets from `Ready` through `Running` to `FinishedSuccess`/`FinishedFailure`,
/// respecting `-j` concurrency and `-k` keep-going semantics (§4.4, §6).
pub struct Scheduler {
    tx: mpsc::Sender<WorkerResult>,
    rx: mpsc::Receiver<WorkerResult>,
    ready: VecDeque<TargetId>,
    running: usize,
    dispatch_stopped: bool,
    any_failure: bool,
    executed: usize,
    cancelled: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(initial_ready: Vec<TargetId>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            ready: initial_ready.into(),
            running: 0,
            dispatch_stopped: false,
            any_failure: false,
            executed: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone-able flag callers can flip from a Ctrl-C handler to request cancellation (§7).
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn executed_count(&self) -> usize {
        self.executed
    }

    /// Run until every reachable target is finished or dispatch has stopped after a failure.
    /// Returns `Ok(())` if nothing failed (or `-k` absorbed all failures into pruned ancestors).
    pub fn run(
        &mut self,
        graph: &mut TargetGraph,
        scope_tree: &ScopeTree,
        options: &Options,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        self.dispatch(graph, scope_tree, options);

        while self.running > 0 {
            let result = match self.rx.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            self.running -= 1;

            match result.outcome {
                Ok(executed) => {
                    if executed {
                        self.executed += 1;
                    }
                    graph.target_mut(result.target).state = SchedState::FinishedSuccess;
                    self.promote_children(graph, result.target);
                }
                Err(e) => {
                    self.any_failure = true;
                    graph.target_mut(result.target).state = SchedState::FinishedFailure;
                    crate::error::log_error(e.to_string(), None);
                    if !options.keep_going {
                        self.dispatch_stopped = true;
                        self.ready.clear();
                    }
                    self.propagate_failure(graph, result.target);
                }
            }

            if !self.dispatch_stopped {
                self.dispatch(graph, scope_tree, options);
            }
        }

        if options.perf {
            crate::error::log_info(
                format!(
                    "scheduler: {} target(s) executed in {:.3}s",
                    self.executed,
                    started.elapsed().as_secs_f64()
                ),
                None,
            );
        }

        if self.any_failure {
            Err(EngineError::command(
                "one or more recipe commands failed",
                Context::new(),
            ))
        } else {
            Ok(())
        }
    }

    /// Pop as many `Ready` targets as the `-j` budget allows. A target with an empty recipe
    /// completes immediately in place, without occupying a worker slot (Boundaries: "recipe with
    /// 0 lines...performs no action"), which may itself free further targets, so the loop keeps
    /// draining `ready` rather than iterating it once.
    fn dispatch(&mut self, graph: &mut TargetGraph, scope_tree: &ScopeTree, options: &Options) {
        while let Some(id) = self.ready.pop_front() {
            if graph.target(id).state != SchedState::Ready {
                // Became Finished-Failure via propagation while still queued.
                continue;
            }

            if graph.target(id).recipe.is_empty() {
                graph.target_mut(id).state = SchedState::FinishedSuccess;
                self.promote_children(graph, id);
                continue;
            }

            if self.running >= options.jobs {
                self.ready.push_front(id);
                break;
            }

            graph.target_mut(id).state = SchedState::Running;
            self.spawn_worker(graph, scope_tree, options, id);
            self.running += 1;
        }
    }

    fn spawn_worker(
        &self,
        graph: &TargetGraph,
        scope_tree: &ScopeTree,
        options: &Options,
        id: TargetId,
    ) {
        let target = graph.target(id);
        let scope = target.scope.clone();
        let ctx = target.context.clone();

        let all_deps: Vec<String> = target
            .out_edges
            .iter()
            .map(|&e| graph.edge(e).child)
            .map(|c| graph.target(c).display_name.clone())
            .collect();
        let changed_deps: Vec<String> = target
            .out_edges
            .iter()
            .map(|&e| graph.edge(e).child)
            .filter(|&c| {
                let child = graph.target(c);
                match (child.mtime, target.mtime) {
                    (Some(cm), Some(tm)) => cm > tm,
                    _ => true,
                }
            })
            .map(|c| graph.target(c).display_name.clone())
            .collect();
        let first_dep = all_deps.first().cloned().unwrap_or_default();
        let stem = std::path::Path::new(&target.display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let recipe_vars = RecipeVars {
            target: &target.display_name,
            stem: &stem,
            all_deps: &all_deps.join(" "),
            changed_deps: &changed_deps.join(" "),
            first_dep: &first_dep,
        };

        let lookup = |name: &str| scope_tree.lookup_var(&scope, name);
        let steps: Result<Vec<ExpandedStep>, EngineError> = target
            .recipe
            .iter()
            .map(|step| match step {
                RecipeStep::Run(line) => {
                    expand::expand(&line.text, &lookup, Some(&recipe_vars), &ctx).map(|command| {
                        ExpandedStep::Run {
                            suppress_echo: line.suppress_echo,
                            tolerate_failure: line.tolerate_failure,
                            command,
                        }
                    })
                }
                RecipeStep::WriteInlineFile { path, contents } => {
                    let path = expand::expand(path, &lookup, Some(&recipe_vars), &ctx)?;
                    let contents = expand::expand(contents, &lookup, Some(&recipe_vars), &ctx)?;
                    Ok(ExpandedStep::WriteFile { path, contents })
                }
            })
            .collect();

        let silent = options.silent;
        let just_print = options.just_print;
        let tx = self.tx.clone();
        let cancelled = self.cancelled.clone();

        std::thread::spawn(move || {
            let mut materialized = vec![];
            let outcome =
                run_steps(steps, &ctx, silent, just_print, &cancelled, &mut materialized);
            // §4.4 "Inline files": removed once the whole recipe finishes, success or failure.
            for path in &materialized {
                let _ = std::fs::remove_file(path);
            }
            let _ = tx.send(WorkerResult { target: id, outcome });
        });
    }

    /// On a target's success, decrement every dependent parent's `unfinished_dependencies`
    /// counter (invariant (c)), promoting to `Ready` any that hit zero.
    fn promote_children(&mut self, graph: &mut TargetGraph, id: TargetId) {
        let parent_edges: Vec<EdgeId> = graph.target(id).in_edges.clone();
        for e in parent_edges {
            let parent = graph.edge(e).parent;
            let remaining = {
                let p = graph.target_mut(parent);
                if p.unfinished_dependencies > 0 {
                    p.unfinished_dependencies -= 1;
                }
                p.unfinished_dependencies
            };
            if remaining == 0 && graph.target(parent).state == SchedState::Pending {
                graph.target_mut(parent).state = SchedState::Ready;
                self.ready.push_back(parent);
                trace!("target '{}' promoted to Ready", graph.target(parent).display_name);
            }
        }
    }

    /// On a target's failure, mark every ancestor reachable only through it as
    /// `Finished-Failure` without executing, cascading upward (§4.4, §7: keep-going still fails
    /// targets whose dependency chain includes the failure).
    fn propagate_failure(&mut self, graph: &mut TargetGraph, id: TargetId) {
        let mut queue = vec![id];
        while let Some(cur) = queue.pop() {
            let parent_edges: Vec<EdgeId> = graph.target(cur).in_edges.clone();
            for e in parent_edges {
                let parent = graph.edge(e).parent;
                let state = graph.target(parent).state;
                if state == SchedState::Pending || state == SchedState::Ready {
                    debug!(
                        "target '{}' cannot be made: dependency '{}' failed",
                        graph.target(parent).display_name,
                        graph.target(cur).display_name
                    );
                    graph.target_mut(parent).state = SchedState::FinishedFailure;
                    queue.push(parent);
                }
            }
        }
    }
}

#[cfg(unix)]
fn run_one(command: &str) -> std::io::Result<std::process::ExitStatus> {
    Command::new("/bin/sh").arg("-c").arg(command).status()
}

#[cfg(windows)]
fn run_one(command: &str) -> std::io::Result<std::process::ExitStatus> {
    Command::new("cmd").arg("/C").arg(command).status()
}
