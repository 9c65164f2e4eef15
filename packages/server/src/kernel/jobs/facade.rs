//! Synchronous façade over the job queue.
//!
//! Enqueues a job with elevated priority and polls it until it reaches a
//! terminal status or the wait timeout elapses. The wait timeout is
//! independent of the job's own work timeout, so an expired wait is
//! classified by the last status seen:
//!
//! - never left `pending` -> `JOB_NOT_STARTED` (queue saturated)
//! - seen `running` -> `JOB_TIMED_OUT`

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::job::{Job, JobStatus, NewJob, PRIORITY_NORMAL, PRIORITY_SYNC};
use super::requests::JobRequest;
use super::store::JobStore;
use crate::config::WorkerConfig;
use crate::error::{ErrorCode, JobError, StoreError};

pub struct QueueExecutor {
    store: Arc<dyn JobStore>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

fn store_error(e: StoreError) -> JobError {
    match e {
        StoreError::NotFound(id) => {
            JobError::new(ErrorCode::JobNotFound, format!("job {id} not found"))
        }
        other => JobError::new(ErrorCode::StoreError, other.to_string()),
    }
}

impl QueueExecutor {
    pub fn new(store: Arc<dyn JobStore>, config: &WorkerConfig) -> Self {
        Self {
            store,
            wait_timeout: config.sync_wait_timeout,
            poll_interval: config.sync_poll_interval,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enqueue a request. Sync submissions get elevated priority.
    pub async fn submit(
        &self,
        request: &JobRequest,
        tenant_id: Option<String>,
        sync: bool,
    ) -> Result<Uuid, JobError> {
        let input = request.to_input().map_err(|e| {
            JobError::new(ErrorCode::InvalidJobInput, format!("cannot encode request: {e}"))
        })?;

        let new = NewJob::builder()
            .job_type(request.job_type())
            .url(request.url().map(str::to_string))
            .input(input)
            .sync(sync)
            .priority(if sync { PRIORITY_SYNC } else { PRIORITY_NORMAL })
            .tenant_id(tenant_id)
            .build();

        let job = self.store.create_job(new).await.map_err(store_error)?;
        debug!(job_id = %job.id, job_type = %job.job_type, sync, "Job enqueued");
        Ok(job.id)
    }

    /// Poll a job until it completes, fails, or the wait timeout elapses.
    pub async fn wait(&self, job_id: Uuid) -> Result<Job, JobError> {
        let deadline = Instant::now() + self.wait_timeout;

        let last_seen = loop {
            let job = self.store.get_job(job_id).await.map_err(store_error)?;

            match job.status {
                JobStatus::Completed => return Ok(job),
                JobStatus::Failed => {
                    return Err(job.job_error().unwrap_or_else(|| {
                        JobError::new(ErrorCode::Other("UNKNOWN".into()), "job failed without an error")
                    }))
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            let now = Instant::now();
            if now >= deadline {
                break job.status;
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        };

        Err(match last_seen {
            JobStatus::Pending => JobError::new(
                ErrorCode::JobNotStarted,
                format!(
                    "job {job_id} did not start within {:?}; the queue may be saturated",
                    self.wait_timeout
                ),
            ),
            _ => JobError::new(
                ErrorCode::JobTimedOut,
                format!("job {job_id} still running after {:?}", self.wait_timeout),
            ),
        })
    }

    /// Enqueue, wait, and decode the output into `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &JobRequest,
        tenant_id: Option<String>,
    ) -> Result<T, JobError> {
        let job_id = self.submit(request, tenant_id, true).await?;
        let job = self.wait(job_id).await?;

        let output = job.output.ok_or_else(|| {
            JobError::new(ErrorCode::InvalidJobOutput, format!("job {job_id} completed without output"))
        })?;
        serde_json::from_value(output).map_err(|e| {
            JobError::new(ErrorCode::InvalidJobOutput, format!("job {job_id} output: {e}"))
        })
    }
}
