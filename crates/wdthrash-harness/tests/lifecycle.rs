//! Run lifecycle against the mock subsystem.
//!
//! These tests drive complete start → stop → join cycles and check liveness,
//! teardown ordering and cleanup without touching the kernel.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wdthrash_config::testing::TestEnvironment;
use wdthrash_config::{Config, ConfigError};
use wdthrash_harness::testing::{
    LifecycleCall, MockSubsystem, RecordingMounter, RegisterScript, UnregisterScript,
};
use wdthrash_harness::{HarnessError, Harness, ResourceError, Role, SubsystemError};

fn harness(mock: &Arc<MockSubsystem>) -> Harness {
    Harness::new(mock.clone(), Arc::new(RecordingMounter::new()))
}

fn run_for(harness: &Harness, config: Config, duration: Duration) -> wdthrash_harness::ExitReport {
    let run = harness.start(config).unwrap();
    thread::sleep(duration);
    assert!(run.stop());
    run.join()
}

#[test]
fn test_immediate_stop_joins_promptly() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let config = env.config();
    let expected_workers = config.total_workers();

    let run = harness(&mock).start(config).unwrap();
    assert_eq!(run.worker_count(), expected_workers);

    let started = Instant::now();
    run.stop();
    let report = run.join();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.hung.is_empty());
    assert!(report.panicked.is_empty());
    assert_eq!(report.workers_started, expected_workers);
    assert_eq!(report.workers_joined, expected_workers);
    assert!(report.is_clean(), "{}", report);
}

#[test]
fn test_every_instance_closed_once_after_its_workers() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mut config = env.config();
    config.instance_count = 3;

    let report = run_for(&harness(&mock), config, Duration::from_millis(100));

    assert_eq!(report.instances_closed, 3);
    assert_eq!(report.instances_leaked, 0);
    assert_eq!(mock.closes(), 3);
    assert_eq!(mock.open_handles(), 0);
    // A worker still running at close time would have hit a closed handle
    assert_eq!(mock.use_after_close(), 0);

    let calls = mock.lifecycle();
    let last_open = calls
        .iter()
        .rposition(|c| matches!(c, LifecycleCall::Open(_)))
        .unwrap();
    let first_close = calls
        .iter()
        .position(|c| matches!(c, LifecycleCall::Close(_)))
        .unwrap();
    assert!(last_open < first_close);
}

#[test]
fn test_join_removes_working_dir_and_backing_files() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let config = env.config();
    let backing: Vec<_> = (0..config.watcher_threads)
        .map(|n| config.working_dir.join(n.to_string()))
        .collect();

    let run = harness(&mock).start(config).unwrap();
    assert!(env.working_dir.exists());
    thread::sleep(Duration::from_millis(100));
    run.stop();
    let report = run.join();

    assert!(report.working_dir_removed);
    assert!(!env.working_dir.exists());
    assert!(backing.iter().all(|p| !p.exists()));
}

#[test]
fn test_fixed_descriptor_pins_bounds() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(
        MockSubsystem::new()
            .with_register(RegisterScript::Fixed(5))
            .with_unregister(UnregisterScript::NotFound),
    );
    let mut config = env.config();
    config.timing.bounds_reset_interval = Duration::from_secs(5);

    let run = harness(&mock).start(config).unwrap();
    let bounds = run.bounds();
    thread::sleep(Duration::from_millis(300));
    run.stop();
    let report = run.join();

    assert_eq!(bounds.low(), 5);
    assert_eq!(bounds.high(), 5);
    assert!(report.hung.is_empty());
    assert!(report.panicked.is_empty());

    // Closers kept hammering 5 and only ever saw NotFound
    let near_low = report.roles[&Role::NearLowCloser].stats;
    assert!(near_low.expected_races > 0);
    assert_eq!(report.totals().unexpected_errors, 0);
}

#[test]
fn test_open_failure_unwinds_startup() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new().fail_open_at(1));
    let mut config = env.config();
    config.instance_count = 3;

    let err = harness(&mock).start(config).err().unwrap();
    match err {
        HarnessError::Resource(ResourceError::OpenInstance { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(source, SubsystemError::ResourceExhausted(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The instance opened before the failure was closed again
    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.closes(), 1);
    assert!(!env.working_dir.exists());
}

#[test]
fn test_invalid_config_rejected_before_any_side_effect() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mut config = env.config();
    config.instance_count = 0;

    let err = harness(&mock).start(config).err().unwrap();
    assert!(matches!(
        err,
        HarnessError::Config(ConfigError::Zero { field: "instances" })
    ));
    assert_eq!(mock.opens(), 0);
    assert!(!env.working_dir.exists());
}

#[test]
fn test_unwritable_working_dir_is_resource_error() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let blocker = env.root.join("file");
    std::fs::write(&blocker, b"").unwrap();
    let mut config = env.config();
    config.working_dir = blocker.join("below-a-file");

    let err = harness(&mock).start(config).err().unwrap();
    assert!(matches!(
        err,
        HarnessError::Resource(ResourceError::WorkingDir { .. })
    ));
    assert_eq!(mock.opens(), 0);
}

#[test]
fn test_mount_churn_balances_mounts() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mounter = Arc::new(RecordingMounter::new());
    let mut config = env.config();
    config.mount.enabled = true;

    let harness = Harness::new(mock.clone(), mounter.clone());
    let report = run_for(&harness, config, Duration::from_millis(100));

    assert!(mounter.mounts() > 0);
    assert_eq!(mounter.mounts(), mounter.unmounts());
    assert_eq!(report.roles[&Role::MountChurner].workers, 1);
    assert!(report.is_clean(), "{}", report);
}

#[test]
fn test_mount_failures_are_not_fatal() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mounter = Arc::new(RecordingMounter::failing());
    let mut config = env.config();
    config.mount.enabled = true;

    let harness = Harness::new(mock.clone(), mounter.clone());
    let report = run_for(&harness, config, Duration::from_millis(100));

    assert!(mounter.attempts() > 1);
    assert!(report.hung.is_empty());
    assert!(report.roles[&Role::MountChurner].stats.unexpected_errors > 0);
}

#[test]
fn test_stop_is_idempotent() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());

    let run = harness(&mock).start(env.config()).unwrap();
    let signal = run.stop_signal();
    assert!(run.stop());
    assert!(!run.stop());
    assert!(!signal.trigger());

    let report = run.join();
    assert!(report.hung.is_empty());
}

#[test]
fn test_external_stop_signal_ends_join() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());

    let run = harness(&mock).start(env.config()).unwrap();
    let signal = run.stop_signal();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signal.trigger();
    });

    let report = run.join();
    stopper.join().unwrap();
    assert!(report.is_clean(), "{}", report);
}

#[test]
fn test_not_found_everywhere_keeps_workers_running() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(
        MockSubsystem::new()
            .with_register(RegisterScript::Sequential { start: 1 })
            .with_unregister(UnregisterScript::NotFound),
    );

    let run = harness(&mock).start(env.config()).unwrap();
    thread::sleep(Duration::from_millis(100));
    let states = run.worker_states();
    assert!(states
        .iter()
        .all(|(_, state)| *state == wdthrash_harness::WorkerState::Running));

    run.stop();
    let report = run.join();
    assert!(report.roles[&Role::RangeCloser].stats.expected_races > 0);
    assert!(report.hung.is_empty());
}

#[test]
fn test_resetter_cadence() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mut config = env.config();
    config.timing.bounds_reset_interval = Duration::from_millis(50);

    let run = harness(&mock).start(config).unwrap();
    let bounds = run.bounds();
    let before = bounds.reset_count();
    thread::sleep(Duration::from_millis(300));
    let resets = bounds.reset_count() - before;
    run.stop();
    run.join();

    // 300ms at one reset per 50ms, with generous slack for scheduling
    assert!(resets >= 3, "only {} resets in 300ms", resets);
}

#[test]
fn test_without_rendezvous() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mut config = env.config();
    config.rendezvous = false;

    let report = run_for(&harness(&mock), config, Duration::from_millis(50));
    assert!(report.is_clean(), "{}", report);
}

#[test]
fn test_stuck_drainer_reported_hung_and_instance_left_open() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new().with_read_stall(Duration::from_secs(3)));
    let mut config = env.config();
    config.timing.join_grace = Duration::from_millis(200);

    let run = harness(&mock).start(config).unwrap();
    thread::sleep(Duration::from_millis(50));
    let stopped_at = Instant::now();
    run.stop();
    let report = run.join();

    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert_eq!(report.hung.len(), 1, "{}", report);
    assert_eq!(report.hung[0].id.role, Role::EventDrainer);
    assert_eq!(report.instances_leaked, 1);
    assert_eq!(report.instances_closed, 0);
    assert_eq!(mock.closes(), 0);
    assert!(!report.working_dir_removed);
    assert!(env.working_dir.exists());
    assert!(!report.is_clean());
}

#[test]
fn test_spawn_failure_unwinds_startup() {
    let env = TestEnvironment::new().unwrap();
    let mock = Arc::new(MockSubsystem::new());
    let mut config = env.config();
    // No system can map a 64 TiB stack
    config.stack_size = 1 << 46;

    let err = harness(&mock).start(config).err().unwrap();
    match err {
        HarnessError::Resource(ResourceError::Spawn { worker, .. }) => {
            assert_eq!(worker, "adder#0@0");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.opens() as u64, mock.closes());
    assert_eq!(mock.open_handles(), 0);
    assert!(!env.working_dir.exists());
}
