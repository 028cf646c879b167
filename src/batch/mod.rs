pub mod local;

pub use local::{JobHandler, LocalBackend};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BatchError;
use crate::node::ResourceNode;
use crate::scheduler::job::JobSpec;

/// How a job finished, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure(String),
    Killed,
}

/// Asynchronous completion notification for a dispatched job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
}

pub type CompletionSender = mpsc::UnboundedSender<JobCompletion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<JobCompletion>;

/// Backend-side reference to a launched job, used for kill requests.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub node_id: String,
}

/// The execution substrate the scheduler hands jobs to.
///
/// The scheduler only needs two things from a backend: start a job on a
/// chosen node, and eventually hear a terminal result on the completion
/// channel. Everything substrate-specific (threads, containers, a cluster
/// manager's wire format) stays behind this trait, which keeps the scheduler
/// testable with an in-memory fake.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Launch a job on `node`. Must not block on job execution: the result
    /// arrives later on `completions`. An `Err` means the handoff itself
    /// failed and no completion will follow.
    async fn submit(
        &self,
        node: &ResourceNode,
        spec: &JobSpec,
        completions: CompletionSender,
    ) -> Result<JobHandle, BatchError>;

    /// Best-effort termination request. The backend confirms by sending a
    /// completion with a `Killed` (or `Failure`) outcome.
    async fn kill(&self, handle: &JobHandle) -> Result<(), BatchError>;
}
