use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{BatchBackend, CompletionSender, JobCompletion, JobHandle, JobOutcome};
use crate::error::BatchError;
use crate::node::ResourceNode;
use crate::scheduler::job::{JobInput, JobSpec};

/// A routine the local backend can run for a job.
///
/// Jobs carry a handler name; the backend resolves it against its registry
/// at submission time.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, input: &JobInput) -> Result<(), BatchError>;
}

/// Runs jobs in-process on tokio tasks.
///
/// Each running job gets a cancellation token; `kill` cancels it and the
/// task reports a `Killed` outcome. This backend stands in for a real
/// cluster substrate in the CLI and in tests.
pub struct LocalBackend {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Backend with the built-in `shell` handler registered.
    pub fn with_shell() -> Self {
        Self::new().register("shell", Arc::new(ShellHandler))
    }
}

#[async_trait]
impl BatchBackend for LocalBackend {
    async fn submit(
        &self,
        node: &ResourceNode,
        spec: &JobSpec,
        completions: CompletionSender,
    ) -> Result<JobHandle, BatchError> {
        let handler = self
            .handlers
            .get(&spec.job.handler)
            .cloned()
            .ok_or_else(|| BatchError::HandlerNotFound(spec.job.handler.clone()))?;

        let job_id = spec.job.id;
        let input = spec.input.clone();
        let token = CancellationToken::new();
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.insert(job_id, token.clone());
        }

        tracing::info!(job_id = %job_id, node_id = %node.node_id, handler = %spec.job.handler, "Launching job locally");

        let running = self.running.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => JobOutcome::Killed,
                result = handler.run(&input) => match result {
                    Ok(()) => JobOutcome::Success,
                    Err(e) => JobOutcome::Failure(e.to_string()),
                },
            };
            {
                let mut running = running.lock().unwrap_or_else(|e| e.into_inner());
                running.remove(&job_id);
            }
            if completions.send(JobCompletion { job_id, outcome }).is_err() {
                tracing::warn!(job_id = %job_id, "Completion receiver dropped before job finished");
            }
        });

        Ok(JobHandle {
            job_id,
            node_id: node.node_id.clone(),
        })
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), BatchError> {
        let token = {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.get(&handle.job_id).cloned()
        };
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(BatchError::SubmissionFailed(format!(
                "job {} is not running on this backend",
                handle.job_id
            ))),
        }
    }
}

/// Executes the job input's `command` field through `sh -c`.
///
/// Input shape: `{"command": "echo hello"}`.
pub struct ShellHandler;

#[async_trait]
impl JobHandler for ShellHandler {
    async fn run(&self, input: &JobInput) -> Result<(), BatchError> {
        let command = input
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BatchError::InvalidInput("missing string field `command`".into()))?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BatchError::SubmissionFailed(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BatchError::SubmissionFailed(if stderr.is_empty() {
                format!("exit code: {:?}", output.status.code())
            } else {
                stderr.trim_end().to_string()
            }))
        }
    }
}

/// Sleeps for the job input's `secs` field. Handy for demos and tests.
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, input: &JobInput) -> Result<(), BatchError> {
        let secs = input.get("secs").and_then(|v| v.as_f64()).unwrap_or(0.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        Ok(())
    }
}
