//! Job runner: polls the store and dispatches jobs to executors.
//!
//! The `JobRunner` is a long-running service that:
//! - Claims pending jobs up to its free capacity on every poll
//! - Runs each claimed job on its own task, holding one global slot
//! - Triggers the retention sweeper no more often than configured
//! - Fails running jobs whose lease lapsed because their worker died
//! - On shutdown, cancels in-flight jobs and waits for them to record a
//!   terminal status
//!
//! # Architecture
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► claim_pending_jobs(free slots)
//!     ├─► spawn run_job(job, child token) ──► executor ──► terminal status
//!     ├─► maybe_recover() (every heartbeat interval)
//!     └─► maybe_sweep() (interval-gated)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sweeper::{RetentionSweeper, SweepReport};
use crate::error::{ErrorCode, JobError, StoreResult};
use crate::executors::run_job;
use crate::kernel::deps::WorkerDeps;

pub struct JobRunner {
    deps: Arc<WorkerDeps>,
    sweeper: Option<RetentionSweeper>,
    worker_id: String,
    max_jobs: usize,
    /// One permit per job allowed to run at once
    slots: Arc<Semaphore>,
    /// Track running jobs for cancellation
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    last_sweep: Mutex<Option<Instant>>,
    last_recovery: Mutex<Option<Instant>>,
}

impl JobRunner {
    pub fn new(deps: Arc<WorkerDeps>) -> Self {
        let max_jobs = deps.config.max_concurrent_jobs.max(1);
        Self {
            deps,
            sweeper: None,
            worker_id: format!("runner-{}", Uuid::new_v4()),
            max_jobs,
            slots: Arc::new(Semaphore::new(max_jobs)),
            running: Arc::new(RwLock::new(HashMap::new())),
            last_sweep: Mutex::new(None),
            last_recovery: Mutex::new(None),
        }
    }

    pub fn with_sweeper(mut self, sweeper: RetentionSweeper) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Jobs currently executing on this runner.
    pub fn running_count(&self) -> usize {
        self.max_jobs - self.slots.available_permits()
    }

    /// Cancel one running job. It fails with `JOB_CANCELLED`.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        match self.running.read().await.get(&job_id) {
            Some(token) => {
                info!(job_id = %job_id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Claim and dispatch as many jobs as there are free slots.
    ///
    /// Returns the number of jobs dispatched.
    pub async fn tick(&self, shutdown: &CancellationToken) -> StoreResult<usize> {
        let capacity = self.slots.available_permits();
        if capacity == 0 || shutdown.is_cancelled() {
            return Ok(0);
        }

        let jobs = self
            .deps
            .store
            .claim_pending_jobs(&self.worker_id, capacity)
            .await?;

        let mut dispatched = 0;
        for job in jobs {
            // only tick acquires slots, so capacity cannot shrink underneath us
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                warn!(job_id = %job.id, "No free slot for claimed job; it will be reclaimed after the lease");
                continue;
            };

            let token = shutdown.child_token();
            self.running.write().await.insert(job.id, token.clone());

            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                priority = job.priority,
                worker_id = %self.worker_id,
                "Dispatching job"
            );

            let deps = self.deps.clone();
            let running = self.running.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                if let Err(e) = run_job(deps, job, token).await {
                    error!(job_id = %job_id, error = %e, "Failed to record job status");
                }
                running.write().await.remove(&job_id);
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Fail running jobs whose lease lapsed without a heartbeat.
    ///
    /// Jobs on a live worker keep their lease fresh, so only jobs whose
    /// worker died (or lost its terminal write) are affected.
    pub async fn recover_expired_jobs(&self) -> StoreResult<usize> {
        let error = JobError::new(
            ErrorCode::JobLeaseExpired,
            format!(
                "no heartbeat for {:?}; the worker running this job stopped",
                self.deps.config.claim_lease
            ),
        );
        let failed = self
            .deps
            .store
            .fail_expired_running_jobs(&error.to_stored())
            .await?;

        for job_id in &failed {
            warn!(job_id = %job_id, "Failed job with expired lease");
        }
        Ok(failed.len())
    }

    async fn maybe_recover(&self) {
        let mut last = self.last_recovery.lock().await;
        let due = last.map_or(true, |at| at.elapsed() >= self.deps.config.heartbeat_interval);
        if !due {
            return;
        }

        *last = Some(Instant::now());
        if let Err(e) = self.recover_expired_jobs().await {
            error!(error = %e, "Failed to recover expired jobs");
        }
    }

    /// Run the sweeper if its interval has elapsed since the last run.
    pub async fn maybe_sweep(&self) -> Option<SweepReport> {
        let sweeper = self.sweeper.as_ref()?;
        let mut last = self.last_sweep.lock().await;

        let due = last.map_or(true, |at| at.elapsed() >= sweeper.config().sweep_interval);
        if !due {
            return None;
        }

        *last = Some(Instant::now());
        Some(sweeper.sweep(Utc::now()).await)
    }

    /// Poll until `shutdown` is cancelled, then drain.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            max_concurrent_jobs = self.max_jobs,
            poll_interval_ms = self.deps.config.poll_interval.as_millis() as u64,
            "Job runner starting"
        );

        loop {
            self.maybe_recover().await;
            if let Err(e) = self.tick(&shutdown).await {
                error!(error = %e, "Failed to claim jobs");
            }
            self.maybe_sweep().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.deps.config.poll_interval) => {}
            }
        }

        self.drain().await;
        info!(worker_id = %self.worker_id, "Job runner stopped");
    }

    /// Wait for every in-flight job to release its slot.
    async fn drain(&self) {
        let in_flight = self.running_count();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, "Draining in-flight jobs");

        let all = u32::try_from(self.max_jobs).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.deps.config.drain_timeout, self.slots.acquire_many(all)).await
        {
            Ok(Ok(_permits)) => info!("All jobs drained"),
            Ok(Err(_)) => warn!("Job slots closed during drain"),
            Err(_) => warn!(
                remaining = self.running_count(),
                "Drain timed out; remaining jobs will be reclaimed or fail on next start"
            ),
        }
    }
}
