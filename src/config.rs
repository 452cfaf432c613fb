// src/config.rs

//! Daemon configuration
//!
//! All working paths are derived from a single base directory so the whole
//! daemon can be pointed at a scratch tree in tests. The built-in scan roots
//! mirror the storage locations users actually drop bundles into: internal
//! homebrew directories plus every USB and extended-storage mount point.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relative path of a bundle's manifest inside its directory
pub const MANIFEST_RELATIVE: &str = "sce_sys/param.json";

/// Stability detection strategy (see `scanner::stability`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StabilityStrategy {
    /// Modification-time heuristic: cheap, one stat per check
    #[default]
    Fast,
    /// Recursive-size resampling: slower, tolerant of slow media
    Thorough,
}

/// Tunables for the stability gate
#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub strategy: StabilityStrategy,
    /// Fast: directory must be untouched for this long
    pub settle_threshold: Duration,
    /// Fast: pause before reporting unstable, throttles hot re-checks
    pub recheck_delay: Duration,
    /// Thorough: pause between size samples
    pub sample_interval: Duration,
    /// Thorough: give up after this many resamples
    pub max_rounds: u32,
    /// Thorough: depth cap for the recursive size walk
    pub max_depth: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            strategy: StabilityStrategy::Fast,
            settle_threshold: Duration::from_secs(10),
            recheck_delay: Duration::from_secs(2),
            sample_interval: Duration::from_secs(2),
            max_rounds: 100,
            max_depth: 3,
        }
    }
}

/// System-visible locations a title occupies once installed
///
/// The mount point exposes the bundle read-only to the platform; the
/// installation directory holds only the copied metadata assets and the
/// link marker pointing back at the bundle source.
#[derive(Debug, Clone)]
pub struct SystemLayout {
    /// Parent of per-title read-only mount points
    pub system_app_dir: PathBuf,
    /// Parent of per-title installation directories
    pub user_app_dir: PathBuf,
}

impl SystemLayout {
    pub fn new(system_app_dir: impl Into<PathBuf>, user_app_dir: impl Into<PathBuf>) -> Self {
        Self {
            system_app_dir: system_app_dir.into(),
            user_app_dir: user_app_dir.into(),
        }
    }

    /// Where the bundle is mounted read-only
    pub fn mount_point(&self, title_id: &str) -> PathBuf {
        self.system_app_dir.join(title_id)
    }

    /// Installation directory holding copied assets
    pub fn install_dir(&self, title_id: &str) -> PathBuf {
        self.user_app_dir.join(title_id)
    }

    /// Marker file recording the original bundle source path
    pub fn link_marker(&self, title_id: &str) -> PathBuf {
        self.install_dir(title_id).join("mount.lnk")
    }

    /// A title counts as registered once its installation directory exists
    pub fn is_registered(&self, title_id: &str) -> bool {
        self.install_dir(title_id).exists()
    }

    /// A title counts as mounted while its manifest is visible through the
    /// mount point
    pub fn is_mounted(&self, title_id: &str) -> bool {
        self.mount_point(title_id).join(MANIFEST_RELATIVE).exists()
    }
}

impl Default for SystemLayout {
    fn default() -> Self {
        Self::new("/system_ex/app", "/user/app")
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Working directory for lock, logs, journals, sentinels, and state db
    pub base_dir: PathBuf,
    /// Built-in scan roots, checked in order every cycle
    pub scan_roots: Vec<PathBuf>,
    /// System locations titles are installed into
    pub layout: SystemLayout,
    /// Pause between poll cycles
    pub poll_interval: Duration,
    /// Automatic retries per title before escalating to repair
    pub max_retries: u32,
    /// Dedup cache capacity; candidates beyond this are dropped for the cycle
    pub dedup_capacity: usize,
    /// Stability gate tunables
    pub stability: StabilityConfig,
    /// Whether restoring an already-registered title raises a notification
    pub notify_on_restore: bool,
}

impl DaemonConfig {
    /// Create a config rooted at `base_dir` with the stock scan roots
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            scan_roots: builtin_scan_roots(),
            layout: SystemLayout::default(),
            poll_interval: Duration::from_secs(3),
            max_retries: 3,
            dedup_capacity: 512,
            stability: StabilityConfig::default(),
            notify_on_restore: false,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join("state.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join("daemon.lock")
    }

    pub fn debug_log_path(&self) -> PathBuf {
        self.base_dir.join("debug.log")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.base_dir.join("telemetry.log")
    }

    /// Per-title action journals live under this directory
    pub fn journal_dir(&self) -> PathBuf {
        self.base_dir.join("journal")
    }

    /// Kill sentinel: presence requests orderly shutdown, removed once honored
    pub fn kill_path(&self) -> PathBuf {
        self.base_dir.join("STOP")
    }

    /// Force-reinstall sentinel: presence forces re-copy + re-register, not
    /// auto-cleared
    pub fn force_path(&self) -> PathBuf {
        self.base_dir.join("FORCE_REINSTALL")
    }

    /// Toast side-channel file read by the external presentation layer
    pub fn toast_path(&self) -> PathBuf {
        self.base_dir.join("notify.txt")
    }

    /// User-editable scan roots, one path per line, re-read each cycle
    pub fn extra_roots_path(&self) -> PathBuf {
        self.base_dir.join("scan_paths.txt")
    }
}

/// The fixed built-in scan root list
fn builtin_scan_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = vec![
        // Internal storage
        PathBuf::from("/data/homebrew"),
        PathBuf::from("/data/etaHEN/games"),
    ];

    // USB subfolders, then USB and extended-storage roots
    for i in 0..8 {
        roots.push(PathBuf::from(format!("/mnt/usb{i}/homebrew")));
    }
    for i in 0..8 {
        roots.push(PathBuf::from(format!("/mnt/usb{i}/etaHEN/games")));
    }
    for i in 0..8 {
        roots.push(PathBuf::from(format!("/mnt/usb{i}")));
    }
    roots.push(PathBuf::from("/mnt/ext0"));
    roots.push(PathBuf::from("/mnt/ext1"));

    roots
}

/// Load user scan roots from a one-path-per-line file
///
/// Blank lines are ignored. A missing or unreadable file yields no roots;
/// the daemon must keep scanning its built-in list regardless.
pub fn load_extra_roots(path: &Path) -> Vec<PathBuf> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect(),
        Err(_) => Vec::new(),
    }
}
