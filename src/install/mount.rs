// src/install/mount.rs

//! Mount primitive seam
//!
//! The installer only needs three operations: re-establish write access on
//! the system partition, loop a bundle directory read-only onto a mount
//! point, and force-unmount a mount point. They are behind a trait so tests
//! can substitute a mounter that works inside a scratch tree.

use crate::Result;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::path::Path;
use tracing::debug;

/// Mount operations used by the installer
pub trait Mounter {
    /// Remount the system partition read-write so mount points can be
    /// created under it. Best effort; the caller ignores failures.
    fn remount_system_rw(&self) -> Result<()>;

    /// Expose `source` read-only at `target`
    fn mount_readonly(&self, source: &Path, target: &Path) -> Result<()>;

    /// Force-unmount `target`. Errors from a target that was never mounted
    /// are expected and ignored by callers.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Real mounter backed by kernel mount syscalls
///
/// Bundles are exposed with a read-only bind mount, the local equivalent of
/// the platform's nullfs loopback mount.
pub struct NullfsMounter {
    /// Root of the system partition remounted read-write before installs
    system_root: std::path::PathBuf,
}

impl NullfsMounter {
    pub fn new(system_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            system_root: system_root.into(),
        }
    }
}

impl Default for NullfsMounter {
    fn default() -> Self {
        Self::new("/system_ex")
    }
}

impl Mounter for NullfsMounter {
    fn remount_system_rw(&self) -> Result<()> {
        mount(
            None::<&str>,
            &self.system_root,
            None::<&str>,
            MsFlags::MS_REMOUNT,
            None::<&str>,
        )
        .map_err(|e| crate::Error::other(format!("remount {:?}: {e}", self.system_root)))?;
        debug!(root = %self.system_root.display(), "system partition remounted rw");
        Ok(())
    }

    fn mount_readonly(&self, source: &Path, target: &Path) -> Result<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| {
            crate::Error::other(format!(
                "mount {} at {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        debug!(source = %source.display(), target = %target.display(), "mounted read-only");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        umount2(target, MntFlags::MNT_FORCE)
            .map_err(|e| crate::Error::other(format!("unmount {}: {e}", target.display())))?;
        debug!(target = %target.display(), "unmounted");
        Ok(())
    }
}
