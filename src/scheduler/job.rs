use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::JobHandle;

/// Opaque, backend-specific job payload.
pub type JobInput = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Scheduled,
    Running,
    Success,
    Failure,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Killed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failure => write!(f, "failure"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

/// A unit of work targeting a named queue.
///
/// The id is assigned at submission and never reused. `handler` names the
/// backend-side routine that runs the job's input; `load` is the number of
/// capacity units reserved on the chosen node for the job's duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub handler: String,
    pub queue_name: String,
    pub load: u32,
    /// Base priority; higher dispatches first under the priority policy.
    #[serde(default)]
    pub priority: i64,
    /// Wall-clock limit in the Running state. Overrides the config default.
    #[serde(default)]
    pub max_run_secs: Option<u64>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        handler: impl Into<String>,
        queue_name: impl Into<String>,
        load: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            handler: handler.into(),
            queue_name: queue_name.into(),
            load,
            priority: 0,
            max_run_secs: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_run_secs(mut self, secs: u64) -> Self {
        self.max_run_secs = Some(secs);
        self
    }
}

/// A job paired with its input payload. Transient: exists from submission
/// until the backend handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job: Job,
    pub input: JobInput,
}

impl JobSpec {
    pub fn new(job: Job, input: JobInput) -> Self {
        Self { job, input }
    }
}

/// The scheduler's bookkeeping for one submitted job.
///
/// Status transitions are the only mutation; `load_released` guards the
/// reserve/release pairing so reserved capacity is given back exactly once.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub assigned_node: Option<String>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub(crate) load_released: bool,
    pub(crate) kill_requested_at: Option<DateTime<Utc>>,
    pub(crate) handle: Option<JobHandle>,
}

impl JobRecord {
    pub fn new(job: Job, submitted_at: DateTime<Utc>) -> Self {
        Self {
            job,
            status: JobStatus::Queued,
            assigned_node: None,
            error: None,
            submitted_at,
            started_at: None,
            completed_at: None,
            load_released: false,
            kill_requested_at: None,
            handle: None,
        }
    }
}
