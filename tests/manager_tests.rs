//! Manager facade tests: directory bootstrap, live administration, and
//! record cleanup.


use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use resman::clock::ManualClock;
use resman::directory::JsonDirectory;
use resman::monitor::AssignmentMonitor;
use resman::scheduler::{Job, JobInput, JobStatus};
use resman::{ResourceManager, ResourceNode};

use test_harness::{
    single_queue, start_manager, start_manager_with_clock, test_config, wait_for_status,
    BackendMode, FakeBackend,
};

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("resman-it-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

/// Bootstrap from JSON files and run a job end to end through the fake
/// backend.
#[tokio::test]
async fn from_directory_runs_jobs() {
    let nodes = write_temp(
        "nodes.json",
        r#"[{"node_id":"n1","address":"127.0.0.1:9001","capacity":8},
            {"node_id":"n2","address":"127.0.0.1:9002","capacity":8}]"#,
    );
    let assignments = write_temp(
        "assignments.json",
        r#"[{"node_id":"n1","queue":"batch"},
            {"node_id":"n2","queue":"batch"},
            {"node_id":"n2","queue":"interactive"}]"#,
    );
    let directory = JsonDirectory::new(&nodes, &assignments);
    let backend = FakeBackend::new(BackendMode::AutoSuccess);

    let manager =
        ResourceManager::from_directory(&directory, backend, test_config()).unwrap();

    let mut queues = manager.queue_names();
    queues.sort();
    assert_eq!(queues, vec!["batch".to_string(), "interactive".to_string()]);
    assert_eq!(manager.nodes_in_queue("batch").unwrap().len(), 2);
    assert_eq!(manager.nodes().unwrap().len(), 2);

    let cancel = tokio_util::sync::CancellationToken::new();
    let loop_handle = manager.start(cancel.clone());

    let id = manager
        .submit_job(Job::new("smoke", "fake", "batch", 2), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&manager, id, JobStatus::Success).await;

    cancel.cancel();
    loop_handle.await.unwrap();

    fs::remove_file(nodes).ok();
    fs::remove_file(assignments).ok();
}

/// Nodes and queues added at runtime become schedulable without a restart.
#[tokio::test]
async fn runtime_administration_takes_effect() {
    let monitor = Arc::new(AssignmentMonitor::with_nodes(Vec::new()));
    let running = start_manager(
        monitor,
        single_queue("q1", &[]),
        FakeBackend::new(BackendMode::AutoSuccess),
        test_config(),
    );

    // Accepted despite having nowhere to go yet.
    let id = running
        .manager
        .submit_job(Job::new("early", "fake", "q1", 2), JobInput::Null)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        running.manager.job_status(id).await.unwrap(),
        JobStatus::Queued
    );

    running
        .manager
        .add_node(ResourceNode::new("late-node", "127.0.0.1:9009", 4))
        .unwrap();
    assert!(running.manager.add_node_to_queue("late-node", "q1"));

    wait_for_status(&running.manager, id, JobStatus::Success).await;
    assert_eq!(running.manager.node_load("late-node").unwrap(), 0);

    running.stop().await;
}

/// Capacity raised at runtime admits a job that previously could not fit.
#[tokio::test]
async fn capacity_increase_unblocks_pending_job() {
    let monitor = Arc::new(AssignmentMonitor::with_nodes(vec![ResourceNode::new(
        "node-a",
        "127.0.0.1:9001",
        2,
    )]));
    let running = start_manager(
        monitor,
        single_queue("q1", &["node-a"]),
        FakeBackend::new(BackendMode::AutoSuccess),
        test_config(),
    );

    // Fits under the raised capacity, not the current one; admission only
    // rejects loads beyond the node's capacity, not its free headroom.
    let err = running
        .manager
        .submit_job(Job::new("big", "fake", "q1", 4), JobInput::Null)
        .await;
    assert!(err.is_err());

    running.manager.set_node_capacity("node-a", 8).unwrap();
    let id = running
        .manager
        .submit_job(Job::new("big", "fake", "q1", 4), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&running.manager, id, JobStatus::Success).await;

    running.stop().await;
}

/// Terminal records older than the cutoff are dropped; fresher and
/// non-terminal ones are kept.
#[tokio::test]
async fn cleanup_drops_only_old_terminal_records() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let monitor = Arc::new(AssignmentMonitor::with_nodes(vec![ResourceNode::new(
        "node-a",
        "127.0.0.1:9001",
        1,
    )]));
    let backend = FakeBackend::new(BackendMode::Manual);
    let running = start_manager_with_clock(
        monitor,
        single_queue("q1", &["node-a"]),
        backend.clone(),
        test_config(),
        clock.clone(),
    );

    let done = running
        .manager
        .submit_job(Job::new("done", "fake", "q1", 1), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&running.manager, done, JobStatus::Running).await;
    backend.complete(done, resman::batch::JobOutcome::Success);
    wait_for_status(&running.manager, done, JobStatus::Success).await;

    let active = running
        .manager
        .submit_job(Job::new("active", "fake", "q1", 1), JobInput::Null)
        .await
        .unwrap();
    wait_for_status(&running.manager, active, JobStatus::Running).await;

    // Nothing is old enough yet.
    clock.advance_secs(30);
    assert_eq!(
        running
            .manager
            .cleanup_finished(Duration::from_secs(3600))
            .await,
        0
    );

    clock.advance_secs(3600);
    assert_eq!(
        running
            .manager
            .cleanup_finished(Duration::from_secs(3600))
            .await,
        1
    );
    assert!(running.manager.job_status(done).await.is_err());
    assert_eq!(
        running.manager.job_status(active).await.unwrap(),
        JobStatus::Running
    );

    running.stop().await;
}

/// Records survive in submission order through `all_jobs`.
#[tokio::test]
async fn all_jobs_sorted_by_submission() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let monitor = Arc::new(AssignmentMonitor::with_nodes(vec![ResourceNode::new(
        "node-a",
        "127.0.0.1:9001",
        10,
    )]));
    let running = start_manager_with_clock(
        monitor,
        single_queue("q1", &["node-a"]),
        FakeBackend::new(BackendMode::AutoSuccess),
        test_config(),
        clock.clone(),
    );

    for name in ["a", "b", "c"] {
        running
            .manager
            .submit_job(Job::new(name, "fake", "q1", 1), JobInput::Null)
            .await
            .unwrap();
        clock.advance_secs(1);
    }

    let names: Vec<String> = running
        .manager
        .all_jobs()
        .await
        .into_iter()
        .map(|r| r.job.name)
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    running.stop().await;
}
