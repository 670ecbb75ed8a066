//! # ymake
//!
//! A parallel, make-compatible build-automation engine.

mod args;

use std::path::PathBuf;

use clap::Parser;

use ymake::{
    find_makefile, log_error, EngineError, Lexer, Precedence, Preprocessor, PreprocessorCache,
    Scheduler, ScopeTree, TargetGraph,
};

use args::Args;

const LICENSE: &str = include_str!("../LICENSE");

/// Print an error message and exit with the error's code.
fn exit_with(err: EngineError) -> ! {
    log_error(err.to_string(), None);
    std::process::exit(err.exit_code())
}

fn run(args: &Args) -> Result<(), EngineError> {
    let mut options = args.to_options();
    let (_, targets) = args.split_args();

    let cwd = std::env::current_dir()
        .map_err(|e| EngineError::resource(e.to_string(), Default::default()))?;
    let makefile_path = find_makefile(args.file.as_deref(), &cwd)
        .ok_or_else(|| EngineError::resource("no makefile found", Default::default()))?;
    let makefile_dir = makefile_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let scope_tree = ScopeTree::new(makefile_dir);
    let root = scope_tree.root();

    // `-o`/`-n` name files the way targets are named on the command line (relative to the
    // invocation directory); normalize them the same way target names are, so the comparison
    // against a target's canonical name in `resolver::probe_mtime` actually matches.
    options.old_file = options
        .old_file
        .iter()
        .map(|f| TargetGraph::normalize_name(f, &root.path))
        .collect();
    options.new_file = options
        .new_file
        .iter()
        .map(|f| TargetGraph::normalize_name(f, &root.path))
        .collect();

    // Environment variables seed the root scope at `Environment` precedence (§3 Variable);
    // `NAME=VALUE` command-line positionals then override at `CommandLine` precedence, the
    // highest level, exactly as the precedence order spec.md lays out.
    for (name, value) in std::env::vars() {
        root.vars.borrow_mut().set(name, value, Precedence::Environment);
    }
    for (name, value) in &options.defines {
        root.vars
            .borrow_mut()
            .set(name.clone(), value.clone(), Precedence::CommandLine);
    }

    let mut graph = TargetGraph::new();
    let mut cache = if options.persistent_cache {
        PreprocessorCache::load(&makefile_path)
    } else {
        PreprocessorCache::disabled()
    };

    let mut lexer = Lexer::new(makefile_path.clone())?;
    let default_goal = {
        let mut preprocessor = Preprocessor::new(&mut graph, &scope_tree, &mut cache, &options);
        preprocessor.run(&mut lexer)?
    };
    cache
        .persist()
        .map_err(|e| EngineError::resource(e.to_string(), Default::default()))?;

    let roots: Vec<_> = if targets.is_empty() {
        match default_goal {
            Some(id) => vec![id],
            None => {
                return Err(EngineError::semantic(
                    "no target specified and no default target found",
                    Default::default(),
                ))
            }
        }
    } else {
        targets
            .iter()
            .map(|t| {
                let name = TargetGraph::normalize_name(t, &root.path);
                graph
                    .find(&name)
                    .unwrap_or_else(|| graph.get_or_create(name, t, &root, false))
            })
            .collect()
    };

    let ready = ymake::resolver::resolve(&mut graph, &scope_tree, &roots, &options)?;
    let mut scheduler = Scheduler::new(ready);
    scheduler.run(&mut graph, &scope_tree, &options)?;

    // A requested root that never needed to run still gets an "is up to date" notice.
    for &id in &roots {
        let t = graph.target(id);
        if t.stale {
            continue;
        }
        if options.old_file.iter().any(|f| f == &t.name) {
            ymake::log_info(format!("'{}' is up to date (old).", t.display_name), None);
        } else {
            ymake::log_info(format!("'{}' is up to date.", t.display_name), None);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.license {
        println!("{}", LICENSE);
        return;
    }

    if let Err(e) = run(&args) {
        exit_with(e);
    }
}
