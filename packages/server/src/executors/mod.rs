//! Job executors.
//!
//! One strategy per job type. [`run_job`] owns the lifecycle around them:
//! decode the stored input, mark the job running, race the executor against
//! its work timeout and the job's cancellation token, then write exactly one
//! terminal status.
//!
//! ```text
//! pending ──decode error──────────────────────────► failed
//!    │
//!    └─► running ──► execute(JobRequest) ──ok──────► completed (output)
//!                        │
//!                        ├─ executor error ────────► failed "<CODE>: <msg>"
//!                        ├─ work timeout ──────────► failed JOB_TIMEOUT
//!                        └─ cancelled ─────────────► failed JOB_CANCELLED
//! ```

pub mod batch;
pub mod crawl;
pub mod documents;
pub mod enrich;
pub mod extract;
pub mod map;
pub mod scrape;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, JobError, StoreResult};
use crate::kernel::deps::WorkerDeps;
use crate::kernel::jobs::{Job, JobRequest, JobStatus};

pub use documents::{DocumentMetadata, DocumentOutput, PageBatchOutput};
pub use extract::{
    summarize_outcomes, ExtractOutput, ExtractResult, ExtractSource, ExtractSummary, UrlOutcome,
};

/// Per-run context handed to every executor.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub deps: Arc<WorkerDeps>,
    /// Cancelled on shutdown or explicit job cancellation
    pub cancel: CancellationToken,
    /// Budget for the whole run
    pub work_timeout: Duration,
}

impl JobContext {
    /// Fail fast when the job was cancelled.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }
}

pub(crate) fn cancelled() -> JobError {
    JobError::new(ErrorCode::JobCancelled, "job cancelled before completion")
}

pub(crate) fn to_output<T: Serialize>(output: &T) -> Result<Value, JobError> {
    serde_json::to_value(output)
        .map_err(|e| JobError::new(ErrorCode::InvalidJobOutput, format!("cannot encode output: {e}")))
}

/// Dispatch a decoded request to its executor.
pub async fn execute(ctx: &JobContext, request: JobRequest) -> Result<Value, JobError> {
    match request {
        JobRequest::Scrape(r) => scrape::run(ctx, r).await,
        JobRequest::Map(r) => map::run(ctx, r).await,
        JobRequest::Crawl(r) => crawl::run(ctx, r).await,
        JobRequest::BatchScrape(r) => batch::run(ctx, r).await,
        JobRequest::Extract(r) => extract::run(ctx, r).await,
    }
}

/// Run one claimed job to a terminal status.
///
/// Returns the status written, or the store error if even the terminal
/// write failed.
pub async fn run_job(
    deps: Arc<WorkerDeps>,
    job: Job,
    cancel: CancellationToken,
) -> StoreResult<JobStatus> {
    let store = deps.store.clone();
    let job_id = job.id;

    let request = match JobRequest::decode(job.job_type, &job.input) {
        Ok(request) => request,
        Err(e) => {
            warn!(job_id = %job_id, job_type = %job.job_type, error = %e, "Job input rejected");
            store
                .update_status(job_id, JobStatus::Failed, Some(&e.to_stored()))
                .await?;
            return Ok(JobStatus::Failed);
        }
    };

    store.update_status(job_id, JobStatus::Running, None).await?;

    let work_timeout = request.work_timeout(&deps.config);
    let ctx = JobContext {
        job_id,
        deps: deps.clone(),
        cancel: cancel.clone(),
        work_timeout,
    };

    info!(
        job_id = %job_id,
        job_type = %job.job_type,
        url = job.url.as_deref().unwrap_or(""),
        timeout_ms = work_timeout.as_millis() as u64,
        "Job started"
    );

    let heartbeat = spawn_heartbeat(&deps, job_id);
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        outcome = tokio::time::timeout(work_timeout, execute(&ctx, request)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(JobError::new(
                ErrorCode::JobTimeout,
                format!("job exceeded its work timeout of {work_timeout:?}"),
            )),
        },
    };
    drop(heartbeat);

    match result {
        Ok(output) => match complete(&deps, job_id, &output).await {
            Ok(()) => {
                info!(job_id = %job_id, job_type = %job.job_type, "Job completed");
                Ok(JobStatus::Completed)
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record job output");
                let err = JobError::new(ErrorCode::StoreError, format!("cannot record output: {e}"));
                store
                    .update_status(job_id, JobStatus::Failed, Some(&err.to_stored()))
                    .await?;
                Ok(JobStatus::Failed)
            }
        },
        Err(e) => {
            if matches!(e.code, ErrorCode::JobCancelled | ErrorCode::JobTimeout) {
                warn!(job_id = %job_id, job_type = %job.job_type, error = %e, "Job interrupted");
            } else {
                debug!(job_id = %job_id, job_type = %job.job_type, error = %e, "Job failed");
            }
            store
                .update_status(job_id, JobStatus::Failed, Some(&e.to_stored()))
                .await?;
            Ok(JobStatus::Failed)
        }
    }
}

/// Keep a running job's lease fresh until the returned guard drops.
///
/// A job whose worker dies stops heartbeating and is failed once its lease
/// lapses (see [`JobRunner`](crate::kernel::jobs::JobRunner)).
fn spawn_heartbeat(deps: &WorkerDeps, job_id: Uuid) -> DropGuard {
    let store = deps.store.clone();
    let interval = deps.config.heartbeat_interval;
    let stop = CancellationToken::new();

    let token = stop.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = store.heartbeat(job_id).await {
                        warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    });

    stop.drop_guard()
}

async fn complete(deps: &WorkerDeps, job_id: Uuid, output: &Value) -> StoreResult<()> {
    deps.store.set_output(job_id, output).await?;
    deps.store
        .update_status(job_id, JobStatus::Completed, None)
        .await
}
