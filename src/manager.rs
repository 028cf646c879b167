use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::BatchBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::directory::NodeDirectory;
use crate::error::Result;
use crate::monitor::{AssignmentMonitor, Monitor};
use crate::node::ResourceNode;
use crate::scheduler::{
    Job, JobInput, JobQueue, JobRecord, JobStatus, QueueManager, Scheduler,
};

/// Front door for clients and operators: submission, status queries, and
/// queue/node administration, wired over an explicitly injected monitor,
/// queue manager, job queue, and batch backend.
pub struct ResourceManager {
    scheduler: Arc<Scheduler>,
    monitor: Arc<dyn Monitor>,
    queue_manager: Arc<QueueManager>,
}

impl ResourceManager {
    pub fn new(
        monitor: Arc<dyn Monitor>,
        queue_manager: Arc<QueueManager>,
        backend: Arc<dyn BatchBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_clock(monitor, queue_manager, backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        monitor: Arc<dyn Monitor>,
        queue_manager: Arc<QueueManager>,
        backend: Arc<dyn BatchBackend>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let job_queue = Arc::new(JobQueue::new(
            config.ordering.clone(),
            config.queue_bound,
            clock.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            monitor.clone(),
            queue_manager.clone(),
            job_queue,
            backend,
            config,
            clock,
        ));
        Self {
            scheduler,
            monitor,
            queue_manager,
        }
    }

    /// Bootstrap monitor and queue memberships from a node/queue directory.
    pub fn from_directory(
        directory: &dyn NodeDirectory,
        backend: Arc<dyn BatchBackend>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let nodes = directory.load_nodes()?;
        let assignments = directory.load_queue_assignments()?;

        let monitor = Arc::new(AssignmentMonitor::with_nodes(nodes));
        let queue_manager = Arc::new(QueueManager::new());
        for (node_id, queues) in assignments {
            for queue in queues {
                queue_manager.add_queue(&queue);
                queue_manager.add_node_to_queue(&node_id, &queue);
            }
        }

        Ok(Self::new(monitor, queue_manager, backend, config))
    }

    /// Spawn the dispatch loop. The returned handle resolves once `cancel`
    /// fires and the loop drains.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(scheduler.run(cancel))
    }

    // ---- submission / status -------------------------------------------

    pub async fn submit_job(&self, job: Job, input: JobInput) -> Result<Uuid> {
        self.scheduler.submit(job, input).await
    }

    pub async fn job_status(&self, id: Uuid) -> Result<JobStatus> {
        self.scheduler.job_status(id).await
    }

    pub async fn job_record(&self, id: Uuid) -> Result<JobRecord> {
        self.scheduler.job_record(id).await
    }

    pub async fn all_jobs(&self) -> Vec<JobRecord> {
        self.scheduler.all_records().await
    }

    pub async fn kill_job(&self, id: Uuid) -> Result<()> {
        self.scheduler.kill_job(id).await
    }

    pub async fn cleanup_finished(&self, older_than: std::time::Duration) -> usize {
        self.scheduler.cleanup_finished(older_than).await
    }

    pub fn node_load(&self, node_id: &str) -> Result<u32> {
        Ok(self.monitor.load(node_id)?)
    }

    pub fn nodes(&self) -> Result<Vec<ResourceNode>> {
        Ok(self.monitor.nodes()?)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queue_manager.queue_names()
    }

    pub fn nodes_in_queue(&self, queue: &str) -> Option<std::collections::BTreeSet<String>> {
        self.queue_manager.nodes(queue)
    }

    // ---- administration ------------------------------------------------

    pub fn add_queue(&self, name: &str) {
        self.queue_manager.add_queue(name);
    }

    pub fn remove_queue(&self, name: &str) -> bool {
        self.queue_manager.remove_queue(name)
    }

    pub fn add_node_to_queue(&self, node_id: &str, queue: &str) -> bool {
        self.queue_manager.add_node_to_queue(node_id, queue)
    }

    pub fn remove_node_from_queue(&self, node_id: &str, queue: &str) -> bool {
        self.queue_manager.remove_node_from_queue(node_id, queue)
    }

    pub fn add_node(&self, node: ResourceNode) -> Result<()> {
        Ok(self.monitor.add_node(node)?)
    }

    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        Ok(self.monitor.remove_node(node_id)?)
    }

    pub fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<()> {
        Ok(self.monitor.set_capacity(node_id, capacity)?)
    }

    /// Pending (not yet dispatched) job count.
    pub fn pending_jobs(&self) -> usize {
        self.scheduler.job_queue().len()
    }
}
