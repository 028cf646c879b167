//! Reaper sweep tests: kill-grace force failure and run-time limits,
//! driven by a manual clock.


use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use resman::clock::ManualClock;
use resman::monitor::{AssignmentMonitor, Monitor};
use resman::scheduler::{Job, JobInput, JobStatus};
use resman::ResourceNode;

use test_harness::{
    single_queue, start_manager_with_clock, test_config, wait_for_status, BackendMode,
    FakeBackend, Running,
};

fn setup(backend: Arc<FakeBackend>, clock: Arc<ManualClock>) -> (Arc<AssignmentMonitor>, Running) {
    let monitor = Arc::new(AssignmentMonitor::with_nodes(vec![ResourceNode::new(
        "node-a",
        "127.0.0.1:9001",
        10,
    )]));
    let running = start_manager_with_clock(
        monitor.clone(),
        single_queue("q1", &["node-a"]),
        backend,
        test_config(),
        clock,
    );
    (monitor, running)
}

/// A backend that never confirms a kill cannot hold the reservation forever:
/// once the grace period passes, the job is failed and its load released.
#[tokio::test]
async fn unconfirmed_kill_is_forced_after_grace() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let backend = FakeBackend::unresponsive();
    let (monitor, running) = setup(backend.clone(), clock.clone());

    let id = running
        .manager
        .submit_job(Job::new("stuck", "fake", "q1", 4), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&running.manager, id, JobStatus::Running).await;

    running.manager.kill_job(id).await.unwrap();
    assert_eq!(backend.kill_requests(), vec![id]);

    // Within the grace period nothing changes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        running.manager.job_status(id).await.unwrap(),
        JobStatus::Running
    );
    assert_eq!(monitor.load("node-a").unwrap(), 4);

    clock.advance_secs(6);
    wait_for_status(&running.manager, id, JobStatus::Failure).await;

    let record = running.manager.job_record(id).await.unwrap();
    assert!(record.error.unwrap().contains("grace period"));
    assert_eq!(monitor.load("node-a").unwrap(), 0);

    running.stop().await;
}

/// A running job past its own run-time limit gets a backend kill; the
/// confirmed termination releases its load.
#[tokio::test]
async fn run_time_limit_triggers_kill() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let backend = FakeBackend::new(BackendMode::Manual);
    let (monitor, running) = setup(backend.clone(), clock.clone());

    let id = running
        .manager
        .submit_job(
            Job::new("long", "fake", "q1", 2).with_max_run_secs(60),
            JobInput::Null,
        )
        .await
        .unwrap();
    wait_for_status(&running.manager, id, JobStatus::Running).await;

    clock.advance_secs(61);
    wait_for_status(&running.manager, id, JobStatus::Killed).await;
    assert_eq!(backend.kill_requests(), vec![id]);
    assert_eq!(monitor.load("node-a").unwrap(), 0);

    running.stop().await;
}

/// The config-level default limit applies when the job carries none.
#[tokio::test]
async fn default_run_time_limit_applies() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let backend = FakeBackend::new(BackendMode::Manual);
    let monitor = Arc::new(AssignmentMonitor::with_nodes(vec![ResourceNode::new(
        "node-a",
        "127.0.0.1:9001",
        10,
    )]));
    let running = start_manager_with_clock(
        monitor,
        single_queue("q1", &["node-a"]),
        backend.clone(),
        test_config().with_default_max_run_secs(30),
        clock.clone(),
    );

    let id = running
        .manager
        .submit_job(Job::new("capped", "fake", "q1", 1), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&running.manager, id, JobStatus::Running).await;

    clock.advance_secs(31);
    wait_for_status(&running.manager, id, JobStatus::Killed).await;

    running.stop().await;
}

/// Full escalation chain: limit exceeded, kill requested, backend silent,
/// grace expires, job force-failed with load released.
#[tokio::test]
async fn timeout_escalates_to_forced_failure() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let backend = FakeBackend::unresponsive();
    let (monitor, running) = setup(backend.clone(), clock.clone());

    let id = running
        .manager
        .submit_job(
            Job::new("runaway", "fake", "q1", 3).with_max_run_secs(60),
            JobInput::Null,
        )
        .await
        .unwrap();
    wait_for_status(&running.manager, id, JobStatus::Running).await;

    clock.advance_secs(61);
    test_harness::assert_eventually(
        || async { backend.kill_requests() == vec![id] },
        Duration::from_secs(5),
        "kill should be requested after the limit",
    )
    .await;
    assert_eq!(
        running.manager.job_status(id).await.unwrap(),
        JobStatus::Running
    );

    clock.advance_secs(6);
    wait_for_status(&running.manager, id, JobStatus::Failure).await;
    assert_eq!(monitor.load("node-a").unwrap(), 0);

    running.stop().await;
}
