// src/scanner/mod.rs

//! Storage scanning
//!
//! Walks the configured scan roots once per poll cycle and turns directory
//! entries into install candidates. Roots are the fixed built-in list plus
//! the user-editable one-path-per-line file, re-read every cycle. Unreadable
//! or missing roots are skipped without aborting the scan; entries without
//! valid metadata are silently excluded.
//!
//! The dedup cache doubles as the metadata cache: a path is extracted once
//! on first sighting, and later cycles reuse the cached id/name. Whether a
//! candidate actually needs work is decided downstream from its persisted
//! state and mount status.

mod dedup;
mod stability;

pub use dedup::{DedupCache, DedupEntry};
pub use stability::StabilityGate;

use crate::config::{load_extra_roots, DaemonConfig, SystemLayout};
use crate::manifest;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A discovered bundle awaiting processing. Ephemeral, produced each scan.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub title_id: String,
    pub title_name: String,
    pub discovered_at: DateTime<Utc>,
}

/// Walks scan roots and yields candidates in discovery order
pub struct PathScanner {
    builtin_roots: Vec<PathBuf>,
    extra_roots_path: PathBuf,
    layout: SystemLayout,
}

impl PathScanner {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            builtin_roots: config.scan_roots.clone(),
            extra_roots_path: config.extra_roots_path(),
            layout: config.layout.clone(),
        }
    }

    /// Current root list: built-ins first, then the user file
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = self.builtin_roots.clone();
        roots.extend(load_extra_roots(&self.extra_roots_path));
        roots
    }

    /// Enumerate all candidates for this cycle, recording newly seen paths
    /// in the dedup cache
    ///
    /// Already-seen paths are yielded from the cache without re-extraction.
    /// New paths that fail metadata extraction are excluded; new paths that
    /// cannot be recorded because the cache is full are dropped for this
    /// cycle with a warning.
    pub fn scan(&self, dedup: &mut DedupCache) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for root in self.roots() {
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();

                if let Some(cached) = dedup.get(&path) {
                    candidates.push(Candidate {
                        path: path.clone(),
                        title_id: cached.title_id.clone(),
                        title_name: cached.title_name.clone(),
                        discovered_at: Utc::now(),
                    });
                    continue;
                }

                let meta = match manifest::extract(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!(path = %path.display(), "excluded: {e}");
                        continue;
                    }
                };

                if !dedup.record(&path, &meta.title_id, &meta.title_name) {
                    warn!(
                        path = %path.display(),
                        "dedup cache full, dropping candidate for this cycle"
                    );
                    continue;
                }

                candidates.push(Candidate {
                    path,
                    title_id: meta.title_id,
                    title_name: meta.title_name,
                    discovered_at: Utc::now(),
                });
            }
        }

        candidates
    }

    /// Count bundles that are new this cycle: not yet in the dedup cache and
    /// not already installed with a live mount
    ///
    /// Used by the startup announcement; records nothing.
    pub fn count_new(&self, dedup: &DedupCache) -> usize {
        let mut count = 0;

        for root in self.roots() {
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if dedup.seen(&path) {
                    continue;
                }
                let Ok(meta) = manifest::extract(&path) else {
                    continue;
                };
                if self.layout.is_registered(&meta.title_id)
                    && self.layout.is_mounted(&meta.title_id)
                {
                    continue;
                }
                count += 1;
            }
        }

        count
    }

    pub fn layout(&self) -> &SystemLayout {
        &self.layout
    }
}

/// Normalize a path for dedup keying
///
/// Resolves symlinks and relative components while the path exists; falls
/// back to the literal path once it is gone so sweep still matches.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
