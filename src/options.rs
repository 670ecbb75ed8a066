//! Library-facing configuration (§6). The library never depends on `clap`; `src/args.rs`
//! translates CLI flags into this struct so the engine stays embeddable on its own.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Options {
    /// Unconditionally make all targets.
    pub always_make: bool,
    /// Consider these files very old; never remake them.
    pub old_file: Vec<String>,
    /// Consider these files very new (never considered stale as a dependency).
    pub new_file: Vec<String>,
    /// Maximum concurrent worker processes.
    pub jobs: usize,
    /// Do not stop dispatch on the first command failure.
    pub keep_going: bool,
    /// Suppress recipe echo.
    pub silent: bool,
    /// Reduced host priority for dispatched workers (`-m`). A no-op on this engine's
    /// thread-per-worker model; threaded through for CLI compatibility (see SPEC_FULL.md §6).
    pub low_priority: bool,
    /// Very-reduced host priority (`-mm`), same caveat as `low_priority`.
    pub very_low_priority: bool,
    /// Emit phase timing on completion.
    pub perf: bool,
    /// Enable the persistent preprocessor cache.
    pub persistent_cache: bool,
    /// Command-line-precedence variable assignments (`NAME=VALUE` positionals).
    pub defines: Vec<(String, String)>,
    /// Only print the commands that would run (`-n`); do not execute them.
    pub just_print: bool,
}

impl Options {
    pub fn default_jobs() -> usize {
        std::env::var("YMAKE_JOB_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| num_cpus::get() + 1)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            always_make: false,
            old_file: vec![],
            new_file: vec![],
            jobs: Self::default_jobs(),
            keep_going: false,
            silent: false,
            low_priority: false,
            very_low_priority: false,
            perf: false,
            persistent_cache: false,
            defines: vec![],
            just_print: false,
        }
    }
}

/// Resolved makefile location, searching common makefile names in `search_dir`.
pub fn find_makefile(explicit: Option<&str>, search_dir: &std::path::Path) -> Option<PathBuf> {
    if let Some(file) = explicit {
        return Some(search_dir.join(file));
    }
    const SEARCH: [&str; 8] = [
        "Makefile",
        "makefile",
        "YMkFile",
        "ymkfile",
        "BSDMakefile",
        "BSDmakefile",
        "GNUMakefile",
        "GNUmakefile",
    ];
    SEARCH
        .iter()
        .map(|f| search_dir.join(f))
        .find(|p| p.is_file())
}
