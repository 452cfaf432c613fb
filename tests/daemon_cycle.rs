// tests/daemon_cycle.rs

//! End-to-end poll-cycle behavior over a scratch filesystem tree

mod common;

use common::TestEnv;
use shadowmount::daemon::{ActionJournal, JournalRecord, RepairDecision};
use shadowmount::install::STATUS_ALREADY_REGISTERED;
use shadowmount::{StateStore, TitleState};
use std::fs;
use std::path::Path;

#[test]
fn test_fresh_install_converges_and_stays_converged() {
    let env = TestEnv::new();
    env.make_bundle("my_game", "CUSA10000", "My Game");
    let (mut daemon, _tx) = env.daemon();

    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.candidates, 1);
    assert_eq!(stats.installed, 1);
    assert_eq!(env.fakes.mount_count(), 1);
    assert_eq!(env.fakes.register_count(), 1);

    let record = daemon.store().load("CUSA10000", Path::new(""));
    assert_eq!(record.state, TitleState::Done);

    let layout = &env.config.layout;
    assert!(layout.is_registered("CUSA10000"));
    assert!(layout.is_mounted("CUSA10000"));
    assert!(layout.install_dir("CUSA10000").join("icon0.png").exists());
    assert!(layout.link_marker("CUSA10000").exists());

    // Second cycle over the same path: zero further mutation while the
    // title is done and its mount is live
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.installed, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(env.fakes.mount_count(), 1);
    assert_eq!(env.fakes.register_count(), 1);
}

#[test]
fn test_removed_bundle_is_swept_before_counting() {
    let env = TestEnv::new();
    let bundle = env.make_bundle("gone_soon", "CUSA10001", "Gone Soon");
    let (mut daemon, _tx) = env.daemon();

    daemon.run_cycle().unwrap();
    assert_eq!(daemon.dedup().len(), 1);

    fs::remove_dir_all(&bundle).unwrap();
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.swept, 1);
    assert_eq!(stats.candidates, 0);
    assert!(daemon.dedup().is_empty());
}

#[test]
fn test_empty_manifest_excluded_from_count_and_queue() {
    let env = TestEnv::new();
    let bundle = env.root.join("broken_dump");
    fs::create_dir_all(bundle.join("sce_sys")).unwrap();
    fs::write(bundle.join("sce_sys/param.json"), "").unwrap();
    let (mut daemon, _tx) = env.daemon();

    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.candidates, 0);
    assert_eq!(env.fakes.mount_count(), 0);
    assert!(daemon.dedup().is_empty());
}

#[test]
fn test_retries_bounded_then_escalated() {
    let env = TestEnv::new();
    env.make_bundle("stubborn", "CUSA10002", "Stubborn Game");
    env.fakes.set_register_status(-1);
    let (mut daemon, _tx) = env.daemon();

    for attempt in 1..=2u32 {
        let stats = daemon.run_cycle().unwrap();
        assert_eq!(stats.failed, 1);
        let record = daemon.store().load("CUSA10002", Path::new(""));
        assert_eq!(record.state, TitleState::Pending);
        assert_eq!(record.retry_count, attempt);
    }

    // Third consecutive failure exhausts MAX_RETRIES and parks the title
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.failed, 1);
    let record = daemon.store().load("CUSA10002", Path::new(""));
    assert_eq!(record.state, TitleState::Error);
    assert_eq!(record.retry_count, 3);
    assert!(daemon.repair_queue().is_parked("CUSA10002"));
    assert!(env
        .fakes
        .banner_lines()
        .iter()
        .any(|m| m.contains("needs attention")));

    // No further automatic attempts without a user decision
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(env.fakes.register_count(), 3);

    // Every failed attempt rolled back cleanly
    assert!(!env.config.layout.mount_point("CUSA10002").exists());
    assert!(!env.config.layout.install_dir("CUSA10002").exists());

    let records = ActionJournal::read_all(&env.config.telemetry_path()).unwrap();
    assert!(records
        .iter()
        .any(|r| matches!(r, JournalRecord::Escalated { retry_count: 3, .. })));
}

#[test]
fn test_user_retry_resumes_attempts() {
    let env = TestEnv::new();
    env.make_bundle("stubborn", "CUSA10003", "Stubborn Game");
    env.fakes.set_register_status(-1);
    let (mut daemon, tx) = env.daemon();

    for _ in 0..4 {
        daemon.run_cycle().unwrap();
    }
    assert_eq!(env.fakes.register_count(), 3);

    tx.send(("CUSA10003".to_string(), RepairDecision::Retry))
        .unwrap();
    daemon.run_cycle().unwrap();

    // The retry reset the budget and dispatched a fresh attempt
    assert_eq!(env.fakes.register_count(), 4);
    assert!(!daemon.repair_queue().is_parked("CUSA10003"));
    let record = daemon.store().load("CUSA10003", Path::new(""));
    assert_eq!(record.state, TitleState::Pending);
    assert_eq!(record.retry_count, 1);
}

#[test]
fn test_user_skip_forgets_title() {
    let env = TestEnv::new();
    env.make_bundle("unwanted", "CUSA10004", "Unwanted Game");
    env.fakes.set_register_status(-1);
    let (mut daemon, tx) = env.daemon();

    for _ in 0..3 {
        daemon.run_cycle().unwrap();
    }
    assert!(daemon.repair_queue().is_parked("CUSA10004"));

    tx.send(("CUSA10004".to_string(), RepairDecision::Skip))
        .unwrap();
    daemon.run_cycle().unwrap();

    assert!(daemon.store().all().unwrap().is_empty());
    assert!(!daemon.repair_queue().is_parked("CUSA10004"));

    // The dedup entry outlives the record, so the title is not retried
    // while its directory remains on storage
    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 3);

    let records = ActionJournal::read_all(&env.config.telemetry_path()).unwrap();
    assert!(records.iter().any(
        |r| matches!(r, JournalRecord::UserDecision { decision, .. } if decision == "skip")
    ));
}

#[test]
fn test_mount_failure_leaves_no_orphans_then_recovers() {
    let env = TestEnv::new();
    env.make_bundle("flaky_media", "CUSA10005", "Flaky Media");
    env.fakes.fail_next_mounts(1);
    let (mut daemon, _tx) = env.daemon();

    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.failed, 1);
    assert!(!env.config.layout.mount_point("CUSA10005").exists());
    assert!(!env.config.layout.install_dir("CUSA10005").exists());
    let record = daemon.store().load("CUSA10005", Path::new(""));
    assert_eq!(record.state, TitleState::Pending);
    assert_eq!(record.retry_count, 1);

    // Media settles; next cycle completes the install
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.installed, 1);
    assert_eq!(
        daemon.store().load("CUSA10005", Path::new("")).state,
        TitleState::Done
    );
}

#[test]
fn test_restore_of_registered_title_is_silent() {
    let env = TestEnv::new();
    env.make_bundle("old_friend", "CUSA10006", "Old Friend");
    // Assets survive from a previous run; only the mount is gone
    fs::create_dir_all(env.config.layout.install_dir("CUSA10006").join("sce_sys")).unwrap();
    env.fakes.set_register_status(STATUS_ALREADY_REGISTERED);
    let (mut daemon, _tx) = env.daemon();

    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.restored, 1);
    assert_eq!(
        daemon.store().load("CUSA10006", Path::new("")).state,
        TitleState::Mounted
    );
    assert!(env.config.layout.is_mounted("CUSA10006"));
    // Restores raise no banner unless configured to
    assert!(env.fakes.banner_lines().is_empty());
    assert!(!env.config.toast_path().exists());
}

#[test]
fn test_force_sentinel_reinstalls_until_cleared() {
    let env = TestEnv::new();
    env.make_bundle("favorite", "CUSA10007", "Favorite Game");
    let (mut daemon, _tx) = env.daemon();

    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 1);

    fs::create_dir_all(&env.config.base_dir).unwrap();
    fs::write(env.config.force_path(), b"").unwrap();

    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 2);

    // The sentinel does not auto-clear; it keeps forcing until removed
    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 3);

    fs::remove_file(env.config.force_path()).unwrap();
    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 3);
}

#[test]
fn test_source_path_change_reprocesses_title() {
    let env = TestEnv::new();
    let old = env.make_bundle("game_v1", "CUSA10008", "Moved Game");
    let (mut daemon, _tx) = env.daemon();

    daemon.run_cycle().unwrap();
    assert_eq!(env.fakes.register_count(), 1);

    let new = env.root.join("game_v2");
    fs::rename(&old, &new).unwrap();

    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.swept, 1);
    assert_eq!(env.fakes.register_count(), 2);
    let record = daemon.store().load("CUSA10008", Path::new(""));
    assert_eq!(record.source_path, new);
}

#[test]
fn test_stale_installing_record_recovered_at_startup() {
    let env = TestEnv::new();
    env.make_bundle("interrupted", "CUSA10009", "Interrupted Game");

    {
        fs::create_dir_all(&env.config.base_dir).unwrap();
        let store = StateStore::open(&env.config.db_path()).unwrap();
        let mut record =
            shadowmount::TitleRecord::new("CUSA10009", &env.root.join("interrupted"));
        record.state = TitleState::Installing;
        store.save(&record).unwrap();
    }

    let (mut daemon, _tx) = env.daemon();
    assert_eq!(
        daemon.store().load("CUSA10009", Path::new("")).state,
        TitleState::Pending
    );

    // The recovered title installs normally
    let stats = daemon.run_cycle().unwrap();
    assert_eq!(stats.installed, 1);
}

#[test]
fn test_startup_announces_backlog_and_processes_it() {
    let env = TestEnv::new();
    env.make_bundle("day_one", "CUSA10010", "Day One");
    let (mut daemon, _tx) = env.daemon();

    daemon.startup().unwrap();

    let banners = env.fakes.banner_lines();
    assert!(banners.iter().any(|m| m.contains("found 1 new bundle")));
    assert!(banners.iter().any(|m| m.contains("library synchronized")));
    assert_eq!(env.fakes.register_count(), 1);
}

#[test]
fn test_startup_with_no_work_reports_ready() {
    let env = TestEnv::new();
    let (mut daemon, _tx) = env.daemon();

    daemon.startup().unwrap();

    let banners = env.fakes.banner_lines();
    assert!(banners.iter().any(|m| m.contains("library ready")));
    assert_eq!(env.fakes.register_count(), 0);
}

#[test]
fn test_kill_sentinel_stops_loop_and_is_removed() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.config.base_dir).unwrap();
    fs::write(env.config.kill_path(), b"").unwrap();
    let (mut daemon, _tx) = env.daemon();

    // The sentinel is observed before the first post-startup cycle
    daemon.run().unwrap();

    assert!(!env.config.kill_path().exists());
    let records = ActionJournal::read_all(&env.config.telemetry_path()).unwrap();
    assert!(records.iter().any(
        |r| matches!(r, JournalRecord::Shutdown { reason, .. } if reason == "kill sentinel")
    ));
}
