use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by monitor implementations.
///
/// A monitor backed by a remote data source reports `Unavailable` when it
/// cannot reach it; the scheduler treats any monitor error as "zero eligible
/// nodes" rather than letting it escape the dispatch loop.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Monitor unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by batch backends when launching or killing jobs.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No handler registered for: {0}")]
    HandlerNotFound(String),

    #[error("Job submission rejected: {0}")]
    SubmissionFailed(String),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid job input: {0}")]
    InvalidInput(String),
}

/// Errors loading the node/queue directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed directory record in {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error(
        "Unschedulable: job load {load} exceeds max node capacity {max_capacity} in queue {queue}"
    )]
    Unschedulable {
        queue: String,
        load: u32,
        max_capacity: u32,
    },

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {id} is already {status}")]
    JobAlreadyTerminal { id: Uuid, status: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Batch backend error: {0}")]
    Batch(#[from] BatchError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, ResourceError>;
