//! Existence cache for candidate source files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Remembers, per path, whether the file was found on the first probe.
///
/// The time-range loop revisits the same candidates on every step; a cached
/// answer is returned without touching the filesystem again.
#[derive(Debug, Default, Clone)]
pub struct FileMemo {
    seen: HashMap<PathBuf, bool>,
}

impl FileMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached existence of `path`, probing the filesystem only on first sight.
    pub fn get_or_probe(&mut self, path: &Path) -> bool {
        if let Some(&exists) = self.seen.get(path) {
            if !exists {
                warn!(path = %path.display(), "file previously found missing");
            }
            return exists;
        }
        let exists = path.exists();
        self.seen.insert(path.to_path_buf(), exists);
        exists
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
