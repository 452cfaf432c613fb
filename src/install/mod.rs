// src/install/mod.rs

//! Mount + install operation with explicit rollback
//!
//! Installing a bundle is an ordered sequence: mount the source read-only
//! at its system-visible mount point, copy the small metadata assets into
//! the installation directory, write the link marker recording the source
//! path, then register the title with the platform service. The sequence is
//! not atomic, so every step's failure undoes whatever earlier steps
//! created: no orphaned mounts, no partially populated installation
//! directories.
//!
//! Only the metadata subtree and icon are ever copied; the bulk of the
//! bundle stays on its storage device behind the read-only mount. The link
//! marker lets a later run remount the bundle without re-copying assets.

mod mount;
mod registry;

pub use mount::{Mounter, NullfsMounter};
pub use registry::{DryRunRegistry, InstallRegistry, STATUS_ALREADY_REGISTERED, STATUS_OK};

#[cfg(feature = "platform")]
pub use registry::PlatformRegistry;

use crate::config::SystemLayout;
use crate::scanner::Candidate;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Successful install results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Title newly registered with the platform
    Installed,
    /// Title was already registered; only the mount was re-established
    Restored,
}

/// Failure of one step of the install sequence, after rollback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstallFailure {
    #[error("mount failed: {0}")]
    Mount(String),

    #[error("asset copy failed: {0}")]
    Copy(String),

    #[error("registration rejected with status {0:#010x}")]
    Register(i32),
}

/// Executes the mount + copy + register sequence for one candidate
pub struct MountInstaller {
    layout: SystemLayout,
    mounter: Box<dyn Mounter>,
    registry: Box<dyn InstallRegistry>,
}

impl MountInstaller {
    pub fn new(
        layout: SystemLayout,
        mounter: Box<dyn Mounter>,
        registry: Box<dyn InstallRegistry>,
    ) -> Self {
        Self {
            layout,
            mounter,
            registry,
        }
    }

    pub fn layout(&self) -> &SystemLayout {
        &self.layout
    }

    /// Install or restore one candidate
    ///
    /// Callers check "registered and mounted" before invoking, so a repeat
    /// call for an already-done title without `force_reinstall` never
    /// reaches this function. Asset copying runs for fresh installs and
    /// forced reinstalls; restores reuse the assets already in place.
    pub fn install(
        &self,
        candidate: &Candidate,
        force_reinstall: bool,
    ) -> std::result::Result<InstallOutcome, InstallFailure> {
        let title_id = &candidate.title_id;
        let mount_point = self.layout.mount_point(title_id);
        let install_dir = self.layout.install_dir(title_id);

        // Step 1: mount the bundle read-only. Nothing to roll back on
        // failure beyond a mount point directory we just created.
        let created_mount_point = !mount_point.exists();
        if let Err(e) = fs::create_dir_all(&mount_point) {
            return Err(InstallFailure::Mount(e.to_string()));
        }
        if let Err(e) = self.mounter.remount_system_rw() {
            debug!(title_id, "system remount skipped: {e}");
        }
        // Clear any stale mount left from a previous run; errors expected
        // when nothing is mounted
        let _ = self.mounter.unmount(&mount_point);
        if let Err(e) = self.mounter.mount_readonly(&candidate.path, &mount_point) {
            if created_mount_point {
                let _ = fs::remove_dir_all(&mount_point);
            }
            return Err(InstallFailure::Mount(e.to_string()));
        }

        // Step 2: copy metadata assets for fresh installs and forced
        // reinstalls
        let assets_present = install_dir.exists();
        if force_reinstall || !assets_present {
            if let Err(e) = self.copy_assets(&candidate.path, &install_dir) {
                warn!(title_id, "asset copy failed: {e}");
                self.rollback(&mount_point, created_mount_point, Some(&install_dir));
                return Err(InstallFailure::Copy(e.to_string()));
            }
        } else {
            debug!(title_id, "assets already present, skipping copy");
        }

        // Step 3: link marker records the source path for future remounts
        let marker = self.layout.link_marker(title_id);
        if let Err(e) = fs::write(&marker, candidate.path.to_string_lossy().as_bytes()) {
            self.rollback(&mount_point, created_mount_point, Some(&install_dir));
            return Err(InstallFailure::Copy(format!("link marker: {e}")));
        }

        // Step 4: register with the platform
        match self.registry.register(title_id, &self.layout.user_app_dir) {
            STATUS_OK => {
                info!(title_id, name = %candidate.title_name, "registered new title");
                Ok(InstallOutcome::Installed)
            }
            STATUS_ALREADY_REGISTERED => {
                info!(title_id, name = %candidate.title_name, "restored registered title");
                Ok(InstallOutcome::Restored)
            }
            status => {
                warn!(title_id, status = format!("{status:#010x}"), "registration rejected");
                self.rollback(&mount_point, created_mount_point, Some(&install_dir));
                Err(InstallFailure::Register(status))
            }
        }
    }

    /// Undo whatever an aborted attempt created: drop the mount, the mount
    /// point directory when this attempt made it, and the installation
    /// directory with everything inside it
    fn rollback(&self, mount_point: &Path, created_mount_point: bool, install_dir: Option<&Path>) {
        let _ = self.mounter.unmount(mount_point);
        if created_mount_point {
            let _ = fs::remove_dir_all(mount_point);
        }
        if let Some(dir) = install_dir {
            let _ = fs::remove_dir_all(dir);
        }
    }

    /// Copy the `sce_sys` subtree and the icon asset into the installation
    /// directory
    fn copy_assets(&self, source: &Path, install_dir: &Path) -> io::Result<()> {
        let src_sce_sys = source.join("sce_sys");
        let dst_sce_sys = install_dir.join("sce_sys");
        fs::create_dir_all(install_dir)?;
        copy_tree(&src_sce_sys, &dst_sce_sys)?;

        // Icon lands at the installation root where the platform looks for it
        let icon_src = src_sce_sys.join("icon0.png");
        if icon_src.exists() {
            fs::copy(&icon_src, install_dir.join("icon0.png"))?;
        }
        Ok(())
    }
}

/// Recursively copy a directory tree
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
