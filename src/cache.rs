//! Persistent preprocessor-result cache (§3 Preprocessor cache entry, §4.5).
//!
//! Memoizes the output of external commands invoked from backtick-literals inside `!if`
//! expressions, keyed by (makefile identity, command string), so re-running the same makefile
//! does not re-spawn the same probe commands. Serialized with `serde_json`, matching the rest of
//! the retrieval pack's preference for JSON over a bespoke binary format (§4.5: "Format is the
//! engine's choice").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub stdout: String,
    pub status: i32,
    /// Unix-epoch seconds when this entry was captured, used to invalidate against a referenced
    /// tool's mtime (§4.5: "Entries may be invalidated by timestamp comparison").
    pub captured_at_secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

/// Per-makefile preprocessor cache. `enabled` gates whether lookups/inserts do anything, so
/// callers can unconditionally go through this type regardless of `--pru`.
pub struct PreprocessorCache {
    path: Option<PathBuf>,
    file: CacheFile,
    enabled: bool,
    dirty: bool,
}

impl PreprocessorCache {
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: CacheFile::default(),
            enabled: false,
            dirty: false,
        }
    }

    /// Load (or start empty) the cache for `makefile_path`. Per §6, truncation/corruption must
    /// fall back to "no entries cached" rather than failing the build.
    pub fn load(makefile_path: &Path) -> Self {
        let path = cache_path_for(makefile_path);
        let file = std::fs::read(&path)
            .ok()
            .and_then(|bytes| match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(
                        "preprocessor cache at {} is corrupt ({}); starting empty",
                        path.display(),
                        e
                    );
                    None
                }
            })
            .unwrap_or_default();

        Self {
            path: Some(path),
            file,
            enabled: true,
            dirty: false,
        }
    }

    /// A cache hit reuses stored output without spawning a process (§4.1 Preprocessor caching).
    pub fn get(&self, command: &str, tool_mtime: Option<SystemTime>) -> Option<&CacheEntry> {
        if !self.enabled {
            return None;
        }
        let entry = self.file.entries.get(command)?;
        if let Some(mtime) = tool_mtime {
            let captured = SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs(entry.captured_at_secs);
            if mtime > captured {
                debug!("cache entry for '{}' is older than its tool; treating as a miss", command);
                return None;
            }
        }
        Some(entry)
    }

    pub fn insert(&mut self, command: String, stdout: String, status: i32, now_secs: u64) {
        if !self.enabled {
            return;
        }
        self.file.entries.insert(
            command,
            CacheEntry {
                stdout,
                status,
                captured_at_secs: now_secs,
            },
        );
        self.dirty = true;
    }

    /// Rewrite the cache file on clean engine exit (§4.5).
    pub fn persist(&self) -> std::io::Result<()> {
        if !self.enabled || !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else { return Ok(()) };
        let bytes = serde_json::to_vec_pretty(&self.file)?;
        std::fs::write(path, bytes)
    }
}

fn cache_path_for(makefile_path: &Path) -> PathBuf {
    let canonical = makefile_path
        .canonicalize()
        .unwrap_or_else(|_| makefile_path.to_path_buf());
    // `<makefile-path>.ymake-cache.json`, a sibling of the makefile itself, so distinct
    // makefiles (by name or by directory) never collide.
    let file_name = format!(
        "{}.ymake-cache.json",
        canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Makefile".to_string())
    );
    canonical
        .parent()
        .map(|dir| dir.join(&file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_never_hits() {
        let mut cache = PreprocessorCache::disabled();
        cache.insert("echo hi".to_string(), "hi".to_string(), 0, 0);
        assert!(cache.get("echo hi", None).is_none());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let makefile = dir.path().join("Makefile");
        std::fs::write(&makefile, "all:\n").unwrap();

        let mut cache = PreprocessorCache::load(&makefile);
        cache.insert("echo hi".to_string(), "hi\n".to_string(), 0, 1000);
        cache.persist().unwrap();

        let reloaded = PreprocessorCache::load(&makefile);
        let entry = reloaded.get("echo hi", None).unwrap();
        assert_eq!(entry.stdout, "hi\n");
        assert_eq!(entry.status, 0);
    }

    #[test]
    fn corrupt_cache_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let makefile = dir.path().join("Makefile");
        std::fs::write(&makefile, "all:\n").unwrap();
        let cache_path = cache_path_for(&makefile.canonicalize().unwrap());
        std::fs::write(&cache_path, b"not json at all {{{").unwrap();

        let cache = PreprocessorCache::load(&makefile);
        assert!(cache.get("anything", None).is_none());
    }
}
