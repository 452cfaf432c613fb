// src/daemon/lock.rs

//! Cross-process exclusion for the daemon
//!
//! A single advisory lock held for the process lifetime. A second instance
//! detects contention at startup and exits immediately with no side
//! effects. The lock releases automatically when the process exits, clean
//! or not, so a crashed daemon never wedges the next one.

use crate::Result;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Process-lifetime exclusive lock
pub struct DaemonLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Try to acquire the lock without blocking
    ///
    /// Returns:
    /// - `Ok(Some(lock))` if this instance now holds the lock
    /// - `Ok(None)` if a peer instance holds it
    /// - `Err` on I/O errors
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!(path = %path.display(), "acquired daemon lock");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(path = %path.display(), "daemon lock held by a peer");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Is the lock currently held by any process?
    ///
    /// Non-destructive; used by the companion kill tool to tell whether a
    /// daemon is running.
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        if !path.exists() {
            return false;
        }
        let Ok(file) = File::open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        // flock releases when the file handle closes
        info!(path = %self.path.display(), "released daemon lock");
    }
}
