// src/scanner/stability.rs

//! Copy-stability detection
//!
//! Decides whether a candidate directory is still being written. Two
//! interchangeable strategies:
//!
//! - **Fast**: stable once the directory's mtime (and its `sce_sys`
//!   subdirectory's, when present) is older than the settle threshold.
//!   Young directories get a short pause and an unstable verdict, forcing a
//!   re-check next cycle.
//! - **Thorough**: recursive byte size, depth-bounded, resampled until two
//!   consecutive samples agree and are nonzero; gives up after a bounded
//!   number of rounds.
//!
//! Both are heuristics, not locks. Adversarial write patterns can fool
//! either; the poll loop re-checks deferred candidates every cycle.

use crate::config::{StabilityConfig, StabilityStrategy};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;
use walkdir::WalkDir;

/// Gate deciding whether a candidate directory has settled
pub struct StabilityGate {
    config: StabilityConfig,
}

impl StabilityGate {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    /// Is the directory's content no longer being written?
    ///
    /// An unstable verdict defers the candidate to the next poll cycle; it
    /// never fails the title.
    pub fn is_stable(&self, path: &Path) -> bool {
        match self.config.strategy {
            StabilityStrategy::Fast => self.is_stable_fast(path),
            StabilityStrategy::Thorough => self.is_stable_thorough(path),
        }
    }

    fn is_stable_fast(&self, path: &Path) -> bool {
        let Some(age) = mtime_age(path) else {
            return false;
        };

        if age > self.config.settle_threshold {
            // Double-check the metadata subdirectory; absent means the root
            // verdict stands
            let sce_sys = path.join("sce_sys");
            match mtime_age(&sce_sys) {
                Some(sys_age) if sys_age <= self.config.settle_threshold => {}
                _ => return true,
            }
        }

        debug!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "still settling, deferring to next cycle"
        );
        std::thread::sleep(self.config.recheck_delay);
        false
    }

    fn is_stable_thorough(&self, path: &Path) -> bool {
        let depth = self.config.max_depth;
        let interval = self.config.sample_interval;
        let stable = settle(
            || recursive_size(path, depth),
            || std::thread::sleep(interval),
            self.config.max_rounds,
        );
        if !stable {
            debug!(
                path = %path.display(),
                rounds = self.config.max_rounds,
                "size never settled, deferring to next cycle"
            );
        }
        stable
    }
}

/// Resample until two consecutive samples are equal and nonzero
///
/// The baseline resets to the latest sample after every mismatch. Returns
/// false once `max_rounds` resamples have been spent.
fn settle<F, P>(mut sample: F, mut pause: P, max_rounds: u32) -> bool
where
    F: FnMut() -> u64,
    P: FnMut(),
{
    let mut baseline = sample();
    for _ in 0..max_rounds {
        pause();
        let next = sample();
        if next == baseline && next > 0 {
            return true;
        }
        baseline = next;
    }
    false
}

/// Total byte size of regular files under `path`, capped at `max_depth`
/// levels to bound the walk
fn recursive_size(path: &Path, max_depth: usize) -> u64 {
    WalkDir::new(path)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// How long ago was this path last modified?
fn mtime_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}
