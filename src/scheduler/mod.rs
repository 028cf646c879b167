pub mod job;
pub mod queue;
pub mod queue_manager;

pub use job::{Job, JobInput, JobRecord, JobSpec, JobStatus};
pub use queue::{JobQueue, QueuedJob};
pub use queue_manager::QueueManager;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{BatchBackend, CompletionReceiver, JobCompletion, JobOutcome};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{ResourceError, Result};
use crate::monitor::Monitor;

/// Matches jobs to nodes under capacity and queue-membership constraints.
///
/// One logical dispatch loop pulls pending jobs, resolves each job's queue
/// name to a candidate node set, reserves capacity through the monitor's
/// atomic admission gate, and hands the job to the batch backend on a worker
/// task. Completion callbacks release the reservation exactly once and set
/// the terminal status. Collaborator outages (monitor, queue manager,
/// backend) degrade to "no eligible node" or a failed job record; they never
/// crash the loop.
pub struct Scheduler {
    monitor: Arc<dyn Monitor>,
    queue_manager: Arc<QueueManager>,
    job_queue: Arc<JobQueue>,
    backend: Arc<dyn BatchBackend>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    completions_tx: mpsc::UnboundedSender<JobCompletion>,
    completions_rx: Mutex<Option<CompletionReceiver>>,
    /// Per-queue round-robin start offsets, so repeated dispatches spread
    /// across a queue's nodes instead of always hammering the first.
    rr_cursors: Mutex<HashMap<String, usize>>,
}

impl Scheduler {
    pub fn new(
        monitor: Arc<dyn Monitor>,
        queue_manager: Arc<QueueManager>,
        job_queue: Arc<JobQueue>,
        backend: Arc<dyn BatchBackend>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            monitor,
            queue_manager,
            job_queue,
            backend,
            config,
            clock,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            completions_tx,
            completions_rx: Mutex::new(Some(completions_rx)),
            rr_cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<dyn Monitor> {
        &self.monitor
    }

    pub fn queue_manager(&self) -> &Arc<QueueManager> {
        &self.queue_manager
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.job_queue
    }

    /// Submit a job for scheduling. Admission errors (unknown queue, load
    /// statically impossible for every resolvable node in the queue) are
    /// rejected here and never enter the pending set.
    pub async fn submit(&self, job: Job, input: JobInput) -> Result<Uuid> {
        let members = self
            .queue_manager
            .nodes(&job.queue_name)
            .ok_or_else(|| ResourceError::UnknownQueue(job.queue_name.clone()))?;

        // A job larger than every resolvable node in its queue can never be
        // scheduled; reject eagerly instead of spinning in the dispatch loop.
        // With zero resolvable nodes this is undecidable, so the job is
        // accepted and stays queued until the queue gains nodes.
        let mut max_capacity: Option<u32> = None;
        for node_id in &members {
            if let Ok(Some(node)) = self.monitor.node_by_id(node_id) {
                max_capacity = Some(max_capacity.map_or(node.capacity, |m| m.max(node.capacity)));
            }
        }
        if let Some(max) = max_capacity {
            if job.load > max {
                return Err(ResourceError::Unschedulable {
                    queue: job.queue_name.clone(),
                    load: job.load,
                    max_capacity: max,
                });
            }
        }

        let id = job.id;
        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(id, JobRecord::new(job.clone(), self.clock.now()));
        }
        if let Err(e) = self.job_queue.add(JobSpec::new(job, input)) {
            self.jobs.write().await.remove(&id);
            return Err(e);
        }

        tracing::info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    pub async fn job_status(&self, id: Uuid) -> Result<JobStatus> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|r| r.status)
            .ok_or(ResourceError::JobNotFound(id))
    }

    pub async fn job_record(&self, id: Uuid) -> Result<JobRecord> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ResourceError::JobNotFound(id))
    }

    /// All job records, sorted by submission time.
    pub async fn all_records(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    /// Cancel a job. Queued jobs are pulled out of the pending set and
    /// marked killed (no load was ever reserved). Scheduled/running jobs get
    /// a best-effort backend kill; their load is released when the backend
    /// confirms termination, or forcibly once the kill grace period expires.
    pub async fn kill_job(&self, id: Uuid) -> Result<()> {
        let handle = {
            let mut jobs = self.jobs.write().await;
            let record = jobs.get_mut(&id).ok_or(ResourceError::JobNotFound(id))?;
            if record.status.is_terminal() {
                return Err(ResourceError::JobAlreadyTerminal {
                    id,
                    status: record.status.to_string(),
                });
            }
            record.kill_requested_at = Some(self.clock.now());
            if record.status == JobStatus::Queued {
                if self.job_queue.remove(id).is_some() {
                    record.status = JobStatus::Killed;
                    record.completed_at = Some(self.clock.now());
                    tracing::info!(job_id = %id, "Queued job cancelled");
                }
                // Otherwise the job is mid-dispatch; the dispatch path
                // observes kill_requested_at and drops it.
                None
            } else {
                record.handle.clone()
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = self.backend.kill(&handle).await {
                tracing::warn!(
                    job_id = %id,
                    error = %e,
                    "Backend kill request failed; load will be force-released after the grace period"
                );
            }
        }
        Ok(())
    }

    /// Drop terminal job records completed at least `older_than` ago.
    /// Returns the number of records removed.
    pub async fn cleanup_finished(&self, older_than: std::time::Duration) -> usize {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, r| {
            !(r.status.is_terminal() && r.completed_at.is_some_and(|at| at <= cutoff))
        });
        before - jobs.len()
    }

    /// The dispatch loop. Suspends until a job is enqueued, a completion
    /// arrives, or the retry interval ticks; runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut completions = {
            let mut slot = self
                .completions_rx
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match slot.take() {
                Some(rx) => rx,
                None => {
                    tracing::error!("Scheduler dispatch loop already started");
                    return;
                }
            }
        };

        let mut tick = tokio::time::interval(self.config.dispatch_interval);
        tracing::info!("Scheduler dispatch loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler dispatch loop shutting down");
                    break;
                }
                _ = self.job_queue.wait_for_job() => {
                    self.dispatch_pass().await;
                }
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion).await;
                    // Freed capacity may unblock a queued job right away.
                    self.dispatch_pass().await;
                }
                _ = tick.tick() => {
                    self.reap_overdue().await;
                    self.dispatch_pass().await;
                }
            }
        }
    }

    /// One pass over the pending set. Every pending job gets one scheduling
    /// attempt; jobs no node will take are collected and requeued after the
    /// pass, so a single unschedulable job at the head never blocks a
    /// schedulable one behind it.
    async fn dispatch_pass(&self) {
        let mut deferred: Vec<QueuedJob> = Vec::new();
        while let Some(entry) = self.job_queue.next() {
            if !self.try_dispatch(&entry).await {
                deferred.push(entry);
            }
        }
        for entry in deferred {
            self.job_queue.requeue(entry);
        }
    }

    /// Attempt to place one job. Returns true when the entry is consumed
    /// (dispatched, or dropped because it was cancelled/purged); false means
    /// "no eligible node right now", regardless of whether that is capacity
    /// exhaustion, an empty or vanished queue, or a monitor outage.
    async fn try_dispatch(&self, entry: &QueuedJob) -> bool {
        let job = &entry.spec.job;

        // Honor a cancellation that raced with the dequeue.
        {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&job.id) {
                Some(record)
                    if record.status == JobStatus::Queued
                        && record.kill_requested_at.is_none() => {}
                Some(record) => {
                    if !record.status.is_terminal() {
                        record.status = JobStatus::Killed;
                        record.completed_at = Some(self.clock.now());
                        tracing::info!(job_id = %job.id, "Job cancelled before dispatch");
                    }
                    return true;
                }
                None => return true,
            }
        }

        let candidates: Vec<String> = match self.queue_manager.nodes(&job.queue_name) {
            Some(members) => members.into_iter().collect(),
            // Queue removed after enqueue: treated like an empty queue; the
            // job stays pending in case the queue is recreated.
            None => Vec::new(),
        };
        if candidates.is_empty() {
            return false;
        }

        let start = {
            let mut cursors = self.rr_cursors.lock().unwrap_or_else(|e| e.into_inner());
            let cursor = cursors.entry(job.queue_name.clone()).or_insert(0);
            let start = *cursor % candidates.len();
            *cursor = cursor.wrapping_add(1);
            start
        };

        for i in 0..candidates.len() {
            let node_id = &candidates[(start + i) % candidates.len()];
            let node = match self.monitor.node_by_id(node_id) {
                Ok(Some(node)) => node,
                // Dangling membership reference: tolerated, skipped.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(node_id, error = %e, "Monitor lookup failed; treating node as unavailable");
                    continue;
                }
            };
            match self.monitor.assign_load(&node.node_id, job.load) {
                Ok(true) => {
                    {
                        let mut jobs = self.jobs.write().await;
                        if let Some(record) = jobs.get_mut(&job.id) {
                            record.status = JobStatus::Scheduled;
                            record.assigned_node = Some(node.node_id.clone());
                        }
                    }
                    tracing::info!(
                        job_id = %job.id,
                        node_id = %node.node_id,
                        load = job.load,
                        "Job scheduled"
                    );
                    self.spawn_handoff(node, entry.spec.clone());
                    return true;
                }
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(node_id = %node.node_id, error = %e, "Load assignment failed");
                    continue;
                }
            }
        }
        false
    }

    /// Hand the job to the backend on its own task so a slow-to-start job
    /// never stalls scheduling of subsequent jobs.
    fn spawn_handoff(&self, node: crate::node::ResourceNode, spec: JobSpec) {
        let backend = self.backend.clone();
        let jobs = self.jobs.clone();
        let clock = self.clock.clone();
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            match backend.submit(&node, &spec, completions.clone()).await {
                Ok(handle) => {
                    let mut jobs = jobs.write().await;
                    if let Some(record) = jobs.get_mut(&spec.job.id) {
                        record.handle = Some(handle);
                        // A very fast job may already be terminal; never
                        // downgrade a terminal status.
                        if record.status == JobStatus::Scheduled {
                            record.status = JobStatus::Running;
                            record.started_at = Some(clock.now());
                            tracing::info!(job_id = %spec.job.id, node_id = %node.node_id, "Job running");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %spec.job.id,
                        node_id = %node.node_id,
                        error = %e,
                        "Backend handoff failed"
                    );
                    // Routed through the completion channel so load release
                    // and terminal bookkeeping happen in exactly one place.
                    let _ = completions.send(JobCompletion {
                        job_id: spec.job.id,
                        outcome: JobOutcome::Failure(format!("backend handoff failed: {e}")),
                    });
                }
            }
        });
    }

    async fn handle_completion(&self, completion: JobCompletion) {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(&completion.job_id) else {
            tracing::warn!(job_id = %completion.job_id, "Completion for unknown job");
            return;
        };
        if record.status.is_terminal() {
            tracing::debug!(job_id = %completion.job_id, "Late completion ignored");
            return;
        }

        self.release_load(record);
        record.status = match completion.outcome {
            JobOutcome::Success => JobStatus::Success,
            JobOutcome::Failure(detail) => {
                record.error = Some(detail);
                JobStatus::Failure
            }
            JobOutcome::Killed => JobStatus::Killed,
        };
        record.completed_at = Some(self.clock.now());
        tracing::info!(
            job_id = %completion.job_id,
            status = %record.status,
            "Job reached terminal state"
        );
    }

    /// Release the job's reserved load. Idempotent per record.
    fn release_load(&self, record: &mut JobRecord) {
        if record.load_released {
            return;
        }
        if let Some(node_id) = &record.assigned_node {
            match self.monitor.reduce_load(node_id, record.job.load) {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    job_id = %record.job.id,
                    node_id = %node_id,
                    "Assigned node no longer known to the monitor; nothing to release"
                ),
                Err(e) => tracing::warn!(
                    job_id = %record.job.id,
                    node_id = %node_id,
                    error = %e,
                    "Failed to release load"
                ),
            }
            record.load_released = true;
        }
    }

    /// Periodic sweep: force-fail jobs whose backend never confirmed a kill
    /// within the grace period, fail jobs orphaned by node removal, and
    /// request kills for jobs past their run-time limit.
    async fn reap_overdue(&self) {
        let now = self.clock.now();
        let mut to_kill = Vec::new();

        {
            let mut jobs = self.jobs.write().await;
            for record in jobs.values_mut() {
                if record.status.is_terminal() {
                    continue;
                }

                if let Some(requested_at) = record.kill_requested_at {
                    let waited = (now - requested_at).to_std().unwrap_or_default();
                    if waited >= self.config.kill_grace {
                        tracing::warn!(
                            job_id = %record.job.id,
                            "Termination not confirmed within grace period; forcing failure"
                        );
                        self.release_load(record);
                        record.status = JobStatus::Failure;
                        record.error =
                            Some("termination not confirmed by backend within grace period".into());
                        record.completed_at = Some(now);
                        continue;
                    }
                }

                if matches!(record.status, JobStatus::Scheduled | JobStatus::Running) {
                    if let Some(node_id) = record.assigned_node.clone() {
                        // Only a definitive "gone" fails the job; a monitor
                        // outage must not.
                        if let Ok(None) = self.monitor.node_by_id(&node_id) {
                            tracing::warn!(
                                job_id = %record.job.id,
                                node_id = %node_id,
                                "Assigned node removed; failing orphaned job"
                            );
                            self.release_load(record);
                            record.status = JobStatus::Failure;
                            record.error = Some(format!("assigned node {node_id} was removed"));
                            record.completed_at = Some(now);
                            continue;
                        }
                    }
                }

                if record.status == JobStatus::Running && record.kill_requested_at.is_none() {
                    let limit = record.job.max_run_secs.or(self.config.default_max_run_secs);
                    if let (Some(limit), Some(started_at)) = (limit, record.started_at) {
                        if (now - started_at).num_seconds() >= limit as i64 {
                            tracing::warn!(
                                job_id = %record.job.id,
                                limit_secs = limit,
                                "Job exceeded run-time limit; requesting kill"
                            );
                            record.kill_requested_at = Some(now);
                            if let Some(handle) = record.handle.clone() {
                                to_kill.push(handle);
                            }
                        }
                    }
                }
            }
        }

        for handle in to_kill {
            if let Err(e) = self.backend.kill(&handle).await {
                tracing::warn!(job_id = %handle.job_id, error = %e, "Timeout kill request failed");
            }
        }
    }
}
