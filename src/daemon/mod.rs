// src/daemon/mod.rs

//! The poll loop
//!
//! One sequential cycle: sweep the dedup cache, drain repair decisions,
//! scan the roots, then drive each candidate through the per-title state
//! machine. Scanning, stability checks, and install attempts run one at a
//! time; the shared mount namespace and title-state table are never touched
//! concurrently. Suspension happens only through bounded sleeps, and the
//! inter-cycle sleep is sliced so a shutdown request is observed promptly
//! instead of after a full interval.
//!
//! Per-candidate failures are isolated: one failing title never aborts the
//! scan of the rest. Only lock contention (handled by the binary before the
//! loop starts) and shutdown requests end the process.

pub mod lock;

mod journal;
mod notify;
mod repair;

pub use journal::{ActionJournal, JournalRecord, JournalSink};
pub use lock::DaemonLock;
pub use notify::{write_toast, LogNotifier, Notifier};
#[cfg(feature = "platform")]
pub use notify::PlatformNotifier;
pub use repair::{DecisionSender, RepairDecision, RepairQueue, RepairRequest};

use crate::config::DaemonConfig;
use crate::install::{InstallOutcome, MountInstaller};
use crate::scanner::{Candidate, DedupCache, PathScanner, StabilityGate};
use crate::state::{RetryCoordinator, RetryDisposition, StateStore, TitleState};
use crate::Result;
use chrono::Utc;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Granularity of the interruptible inter-cycle sleep
const SLEEP_SLICE: Duration = Duration::from_millis(200);

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Cooperative shutdown, safe to call from a signal handler
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Counters for one poll cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    /// Dedup entries invalidated because their path vanished
    pub swept: usize,
    /// Candidates observed this cycle
    pub candidates: usize,
    /// Fresh installs completed
    pub installed: usize,
    /// Already-registered titles remounted
    pub restored: usize,
    /// Attempts that failed (after rollback)
    pub failed: usize,
    /// Candidates deferred by the stability gate
    pub deferred: usize,
    /// Candidates skipped as already converged, parked, or in flight
    pub skipped: usize,
}

/// The install daemon: owns every pipeline component and drives them from
/// a single thread
pub struct Daemon {
    config: DaemonConfig,
    scanner: PathScanner,
    dedup: DedupCache,
    gate: StabilityGate,
    installer: MountInstaller,
    store: StateStore,
    coordinator: RetryCoordinator,
    repair: RepairQueue,
    journal: JournalSink,
    notifier: Box<dyn Notifier>,
}

impl Daemon {
    /// Assemble a daemon from its external collaborators
    ///
    /// Returns the daemon plus the sender repair decisions arrive on.
    pub fn new(
        config: DaemonConfig,
        installer: MountInstaller,
        notifier: Box<dyn Notifier>,
    ) -> Result<(Self, DecisionSender)> {
        fs::create_dir_all(&config.base_dir)?;

        let store = StateStore::open(&config.db_path())?;
        store.recover_stale_installing()?;

        let journal = JournalSink::new(config.telemetry_path(), config.journal_dir())?;
        let (repair, decisions) = RepairQueue::new();

        let daemon = Self {
            scanner: PathScanner::new(&config),
            dedup: DedupCache::new(config.dedup_capacity),
            gate: StabilityGate::new(config.stability.clone()),
            store,
            coordinator: RetryCoordinator::new(config.max_retries),
            repair,
            journal,
            notifier,
            installer,
            config,
        };
        Ok((daemon, decisions))
    }

    /// Startup announcement: count new work, then either report a ready
    /// library or process the backlog immediately
    pub fn startup(&mut self) -> Result<()> {
        let new_bundles = self.scanner.count_new(&self.dedup);
        if new_bundles == 0 {
            self.notifier.banner("ShadowMount: library ready");
            return Ok(());
        }

        self.notifier
            .banner(&format!("ShadowMount: found {new_bundles} new bundles, installing"));
        self.run_cycle()?;
        self.notifier.banner("ShadowMount: library synchronized");
        Ok(())
    }

    /// Run until a kill sentinel or shutdown signal arrives
    pub fn run(&mut self) -> Result<()> {
        self.startup()?;

        loop {
            if self.sleep_until_next_cycle() {
                break;
            }
            let stats = self.run_cycle()?;
            debug!(?stats, "cycle complete");
        }

        self.shutdown()
    }

    /// One full poll cycle
    pub fn run_cycle(&mut self) -> Result<CycleStats> {
        let mut stats = CycleStats {
            swept: self.dedup.sweep(),
            ..CycleStats::default()
        };

        self.handle_repair_decisions();

        let force_reinstall = self.config.force_path().exists();
        if force_reinstall {
            debug!("force-reinstall sentinel present");
        }

        let candidates = self.scanner.scan(&mut self.dedup);
        stats.candidates = candidates.len();

        for candidate in &candidates {
            if let Err(e) = self.process_candidate(candidate, force_reinstall, &mut stats) {
                // Isolation: a failing title never aborts the rest of the scan
                error!(
                    title_id = %candidate.title_id,
                    "candidate processing error: {e}"
                );
            }
        }

        Ok(stats)
    }

    /// Drive one candidate through the state machine
    fn process_candidate(
        &mut self,
        candidate: &Candidate,
        force_reinstall: bool,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let title_id = &candidate.title_id;

        if self.repair.is_parked(title_id) || self.repair.is_dismissed(title_id) {
            stats.skipped += 1;
            return Ok(());
        }

        let mut record = self.store.load(title_id, &candidate.path);

        match record.state {
            // At most one attempt in flight per title; a persisted
            // Installing outside recovery means another instance raced us
            TitleState::Installing => {
                warn!(title_id, "record already in flight, skipping");
                stats.skipped += 1;
                return Ok(());
            }
            // Parked state from a previous run: restore the queue entry
            TitleState::Error => {
                self.repair.park(RepairRequest {
                    title_id: title_id.clone(),
                    title_name: candidate.title_name.clone(),
                    retry_count: record.retry_count,
                });
                stats.skipped += 1;
                return Ok(());
            }
            _ => {}
        }

        let registered = self.installer.layout().is_registered(title_id);
        let mounted = self.installer.layout().is_mounted(title_id);
        let source_changed = record.source_path != candidate.path;

        // Converged: registered, mount live, and nothing forcing a redo
        if registered && mounted && !force_reinstall && !source_changed {
            stats.skipped += 1;
            return Ok(());
        }

        // Only fresh installs are gated on copy stability; a remount reads
        // nothing that is still being written
        let fresh = !registered;
        if fresh {
            if !self.gate.is_stable(&candidate.path) {
                debug!(title_id, "content still settling, deferred");
                stats.deferred += 1;
                return Ok(());
            }
            self.notifier
                .banner(&format!("Installing: {}...", candidate.title_name));
        }

        let attempt_id = Uuid::new_v4().to_string();
        self.journal.record(&JournalRecord::AttemptStarted {
            attempt_id: attempt_id.clone(),
            title_id: title_id.clone(),
            title_name: candidate.title_name.clone(),
            source_path: candidate.path.clone(),
            force_reinstall,
            timestamp: Utc::now(),
        })?;

        record.source_path = candidate.path.clone();
        self.coordinator.begin(&self.store, &mut record)?;

        match self.installer.install(candidate, force_reinstall) {
            Ok(outcome) => {
                self.coordinator.complete(&self.store, &mut record, outcome)?;
                self.journal.record(&JournalRecord::AttemptSucceeded {
                    attempt_id,
                    title_id: title_id.clone(),
                    outcome: format!("{outcome:?}"),
                    timestamp: Utc::now(),
                })?;
                self.announce_success(candidate, outcome);
                match outcome {
                    InstallOutcome::Installed => stats.installed += 1,
                    InstallOutcome::Restored => stats.restored += 1,
                }
            }
            Err(failure) => {
                stats.failed += 1;
                let disposition = self.coordinator.fail(&self.store, &mut record)?;
                self.journal.record(&JournalRecord::AttemptFailed {
                    attempt_id,
                    title_id: title_id.clone(),
                    reason: failure.to_string(),
                    retry_count: record.retry_count,
                    timestamp: Utc::now(),
                })?;

                if disposition == RetryDisposition::Escalated {
                    self.journal.record(&JournalRecord::Escalated {
                        title_id: title_id.clone(),
                        retry_count: record.retry_count,
                        timestamp: Utc::now(),
                    })?;
                    self.repair.park(RepairRequest {
                        title_id: title_id.clone(),
                        title_name: candidate.title_name.clone(),
                        retry_count: record.retry_count,
                    });
                    self.notifier.banner(&format!(
                        "{} needs attention: reply retry or skip",
                        candidate.title_name
                    ));
                }
            }
        }

        Ok(())
    }

    fn announce_success(&mut self, candidate: &Candidate, outcome: InstallOutcome) {
        let notify = match outcome {
            InstallOutcome::Installed => true,
            // Silent on restore by default to avoid banner spam every boot
            InstallOutcome::Restored => self.config.notify_on_restore,
        };
        if !notify {
            return;
        }
        let message = match outcome {
            InstallOutcome::Installed => "Installed",
            InstallOutcome::Restored => "Restored",
        };
        if let Err(e) = write_toast(
            &self.config.toast_path(),
            &candidate.title_id,
            &candidate.title_name,
            message,
        ) {
            warn!("toast write failed: {e}");
        }
        self.notifier
            .banner(&format!("{}: {message}", candidate.title_name));
    }

    /// Apply user decisions that arrived since the last cycle
    fn handle_repair_decisions(&mut self) {
        for (request, decision) in self.repair.drain_decisions() {
            info!(
                title_id = %request.title_id,
                decision = decision.as_str(),
                "repair decision received"
            );
            if let Err(e) = self.journal.record(&JournalRecord::UserDecision {
                title_id: request.title_id.clone(),
                decision: decision.as_str().to_string(),
                timestamp: Utc::now(),
            }) {
                warn!("journal write failed: {e}");
            }

            let result = match decision {
                RepairDecision::Retry => {
                    let mut record = self
                        .store
                        .load(&request.title_id, std::path::Path::new(""));
                    self.coordinator.user_retry(&self.store, &mut record)
                }
                RepairDecision::Skip => {
                    self.repair.dismiss(&request.title_id);
                    self.coordinator.user_skip(&self.store, &request.title_id)
                }
            };
            if let Err(e) = result {
                error!(title_id = %request.title_id, "repair decision failed: {e}");
            }
        }
    }

    /// Sleep the poll interval in slices, returning true if a shutdown was
    /// requested meanwhile
    fn sleep_until_next_cycle(&self) -> bool {
        let deadline = Instant::now() + self.config.poll_interval;
        loop {
            if self.stop_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    fn stop_requested(&self) -> bool {
        shutdown_requested() || self.config.kill_path().exists()
    }

    /// Persist everything, honor the kill sentinel, journal the shutdown
    fn shutdown(&mut self) -> Result<()> {
        let kill_path = self.config.kill_path();
        let reason = if kill_path.exists() {
            // Removed once honored so the next start is not a false stop
            let _ = fs::remove_file(&kill_path);
            "kill sentinel"
        } else {
            "signal"
        };

        info!(reason, "shutting down");
        self.journal.record(&JournalRecord::Shutdown {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })?;
        Ok(())
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn repair_queue(&self) -> &RepairQueue {
        &self.repair
    }
}
