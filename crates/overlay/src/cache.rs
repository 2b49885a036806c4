//! Parsed-source cache.
//!
//! Entries are keyed by path and stamped with the file's modification time
//! and length at parse time; a changed stamp forces a re-parse.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::error::{ErrorKind, Result};
use crate::source::{SourceFormat, SourceNode, load_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|error| ErrorKind::Source {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        Ok(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    node: SourceNode,
    stamp: FileStamp,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: FxHashMap<PathBuf, CacheEntry>,
    stats: CacheStats,
}

/// Cache for parsed source files.
#[derive(Debug, Default)]
pub struct SourceCache {
    state: Mutex<CacheState>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parsed tree of `path`, re-parsing when the file changed.
    pub fn load(&self, path: &Path, format: SourceFormat) -> Result<SourceNode> {
        let stamp = FileStamp::read(path)?;
        {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(path).filter(|entry| entry.stamp == stamp) {
                let node = entry.node.clone();
                state.stats.hits += 1;
                log::trace!("source cache hit: {}", path.display());
                return Ok(node);
            }
        }

        log::debug!("parsing {}", path.display());
        let node = load_file(path, format)?;
        let mut state = self.lock();
        state.stats.misses += 1;
        state.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                node: node.clone(),
                stamp,
            },
        );
        Ok(node)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.lock().entries.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
