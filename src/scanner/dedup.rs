// src/scanner/dedup.rs

//! Bounded dedup cache of already-seen candidate paths
//!
//! Keyed by normalized path with an explicit capacity. When the cache is
//! full, new candidates are rejected for the cycle and the caller logs the
//! drop - deliberate backpressure instead of silent slot exhaustion. An
//! entry's validity is a pure function of filesystem existence: `sweep`
//! removes entries whose backing directory is gone, freeing the slot and
//! letting a recreated directory be processed as new.

use super::normalize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cached identity of a seen candidate path
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub title_id: String,
    pub title_name: String,
}

/// Bounded map of seen candidate paths to their extracted identity
pub struct DedupCache {
    capacity: usize,
    entries: HashMap<PathBuf, DedupEntry>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Has this path been recorded (and not swept since)?
    pub fn seen(&self, path: &Path) -> bool {
        self.entries.contains_key(&normalize(path))
    }

    /// Cached identity for a seen path
    pub fn get(&self, path: &Path) -> Option<&DedupEntry> {
        self.entries.get(&normalize(path))
    }

    /// Record a newly seen path. Returns false when the cache is at
    /// capacity, in which case the candidate is dropped for this cycle.
    pub fn record(&mut self, path: &Path, title_id: &str, title_name: &str) -> bool {
        let key = normalize(path);
        if self.entries.contains_key(&key) {
            return true;
        }
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.insert(
            key,
            DedupEntry {
                title_id: title_id.to_string(),
                title_name: title_name.to_string(),
            },
        );
        true
    }

    /// Drop entries whose backing directory no longer exists. Returns the
    /// number of entries invalidated.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, entry| {
            let alive = path.exists();
            if !alive {
                debug!(
                    path = %path.display(),
                    title_id = %entry.title_id,
                    "dedup entry invalidated, path gone"
                );
            }
            alive
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
