// tests/common/mod.rs

//! Shared fixtures for daemon integration tests
//!
//! Everything runs inside a tempdir: scan root, system/user app trees, and
//! the daemon working directory. The fake mounter simulates a bind mount by
//! copying the bundle's `sce_sys` into the mount point, which is exactly
//! what the mounted-visibility check looks for.

use shadowmount::daemon::{Daemon, DecisionSender, Notifier};
use shadowmount::install::{InstallRegistry, MountInstaller, Mounter, STATUS_OK};
use shadowmount::{DaemonConfig, StabilityStrategy, SystemLayout};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Handles into the fake collaborators, shared with the daemon under test
#[derive(Clone)]
pub struct Fakes {
    pub mount_calls: Arc<AtomicUsize>,
    pub fail_mounts: Arc<AtomicUsize>,
    pub register_calls: Arc<AtomicUsize>,
    pub register_status: Arc<AtomicI32>,
    pub banners: Arc<Mutex<Vec<String>>>,
}

impl Fakes {
    fn new() -> Self {
        Self {
            mount_calls: Arc::new(AtomicUsize::new(0)),
            fail_mounts: Arc::new(AtomicUsize::new(0)),
            register_calls: Arc::new(AtomicUsize::new(0)),
            register_status: Arc::new(AtomicI32::new(STATUS_OK)),
            banners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn mount_count(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_mounts(&self, count: usize) {
        self.fail_mounts.store(count, Ordering::SeqCst);
    }

    pub fn set_register_status(&self, status: i32) {
        self.register_status.store(status, Ordering::SeqCst);
    }

    pub fn banner_lines(&self) -> Vec<String> {
        self.banners.lock().unwrap().clone()
    }
}

/// Mounter that materializes a mount by copying `sce_sys` into the target
struct FakeBindMounter {
    fakes: Fakes,
}

impl Mounter for FakeBindMounter {
    fn remount_system_rw(&self) -> shadowmount::Result<()> {
        Ok(())
    }

    fn mount_readonly(&self, source: &Path, target: &Path) -> shadowmount::Result<()> {
        if self.fakes.fail_mounts.load(Ordering::SeqCst) > 0 {
            self.fakes.fail_mounts.fetch_sub(1, Ordering::SeqCst);
            return Err(shadowmount::Error::other("injected mount failure"));
        }
        self.fakes.mount_calls.fetch_add(1, Ordering::SeqCst);
        copy_tree(&source.join("sce_sys"), &target.join("sce_sys"))
            .map_err(|e| shadowmount::Error::other(format!("fake mount: {e}")))
    }

    fn unmount(&self, target: &Path) -> shadowmount::Result<()> {
        let mounted = target.join("sce_sys");
        if mounted.exists() {
            fs::remove_dir_all(&mounted)
                .map_err(|e| shadowmount::Error::other(format!("fake unmount: {e}")))
        } else {
            Err(shadowmount::Error::other("not mounted"))
        }
    }
}

struct FakeRegistry {
    fakes: Fakes,
}

impl InstallRegistry for FakeRegistry {
    fn register(&self, _title_id: &str, _install_base: &Path) -> i32 {
        self.fakes.register_calls.fetch_add(1, Ordering::SeqCst);
        self.fakes.register_status.load(Ordering::SeqCst)
    }
}

struct CollectingNotifier {
    fakes: Fakes,
}

impl Notifier for CollectingNotifier {
    fn banner(&self, message: &str) {
        self.fakes.banners.lock().unwrap().push(message.to_string());
    }
}

/// A complete daemon environment inside one tempdir
pub struct TestEnv {
    pub base: TempDir,
    pub config: DaemonConfig,
    pub root: PathBuf,
    pub fakes: Fakes,
}

impl TestEnv {
    pub fn new() -> Self {
        let base = TempDir::new().unwrap();
        let root = base.path().join("usb0");
        fs::create_dir_all(&root).unwrap();

        let mut config = DaemonConfig::new(base.path().join("work"));
        config.scan_roots = vec![root.clone()];
        config.layout = SystemLayout::new(
            base.path().join("system_ex/app"),
            base.path().join("user/app"),
        );
        config.poll_interval = Duration::from_millis(10);
        // Tempdir bundles are written in one shot; no settling needed
        config.stability.strategy = StabilityStrategy::Fast;
        config.stability.settle_threshold = Duration::from_secs(0);
        config.stability.recheck_delay = Duration::from_millis(0);

        Self {
            base,
            config,
            root,
            fakes: Fakes::new(),
        }
    }

    pub fn daemon(&self) -> (Daemon, DecisionSender) {
        let installer = MountInstaller::new(
            self.config.layout.clone(),
            Box::new(FakeBindMounter {
                fakes: self.fakes.clone(),
            }),
            Box::new(FakeRegistry {
                fakes: self.fakes.clone(),
            }),
        );
        Daemon::new(
            self.config.clone(),
            installer,
            Box::new(CollectingNotifier {
                fakes: self.fakes.clone(),
            }),
        )
        .unwrap()
    }

    /// Drop a bundle with a valid manifest into the scan root
    pub fn make_bundle(&self, dir_name: &str, title_id: &str, title_name: &str) -> PathBuf {
        make_bundle_in(&self.root, dir_name, title_id, title_name)
    }
}

pub fn make_bundle_in(root: &Path, dir_name: &str, title_id: &str, title_name: &str) -> PathBuf {
    let bundle = root.join(dir_name);
    let sce_sys = bundle.join("sce_sys");
    fs::create_dir_all(&sce_sys).unwrap();
    fs::write(
        sce_sys.join("param.json"),
        format!(r#"{{ "titleId": "{title_id}", "titleName": "{title_name}" }}"#),
    )
    .unwrap();
    fs::write(sce_sys.join("icon0.png"), b"png").unwrap();
    bundle
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
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
