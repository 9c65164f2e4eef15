//! Job store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::job::{Document, Job, JobStatus, JobType, NewDocument, NewJob};
use crate::error::StoreResult;

/// Durable record of jobs and their documents.
///
/// Every method must be safe under concurrent callers, including several
/// worker processes sharing one backing store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job in `pending`.
    async fn create_job(&self, job: NewJob) -> StoreResult<Job>;

    /// Fails with `StoreError::NotFound` for unknown ids.
    async fn get_job(&self, id: Uuid) -> StoreResult<Job>;

    /// Move a job along the state machine.
    ///
    /// `failed` requires a non-empty error and clears any output;
    /// `completed` requires output already written with [`set_output`].
    ///
    /// [`set_output`]: JobStore::set_output
    async fn update_status(&self, id: Uuid, status: JobStatus, error: Option<&str>)
        -> StoreResult<()>;

    /// Write the output of a `running` job ahead of completing it.
    async fn set_output(&self, id: Uuid, output: &Value) -> StoreResult<()>;

    /// Atomically claim up to `max` pending jobs for `worker_id`.
    ///
    /// Higher priority first, then oldest. Claimed jobs stay `pending` until
    /// the executor marks them running; a claim older than the store's lease
    /// may be taken over by another worker.
    async fn claim_pending_jobs(&self, worker_id: &str, max: usize) -> StoreResult<Vec<Job>>;

    /// Refresh the lease of a `running` job. A no-op in any other state.
    async fn heartbeat(&self, id: Uuid) -> StoreResult<()>;

    /// Fail every `running` job whose lease lapsed without a heartbeat.
    ///
    /// Returns the ids that were failed with `error`.
    async fn fail_expired_running_jobs(&self, error: &str) -> StoreResult<Vec<Uuid>>;

    async fn add_document(&self, document: NewDocument) -> StoreResult<Document>;

    /// Documents of a job in insertion order.
    async fn list_documents(&self, job_id: Uuid) -> StoreResult<Vec<Document>>;

    /// Delete finished jobs of a type completed before `cutoff`.
    async fn delete_expired_jobs_by_type(
        &self,
        job_type: JobType,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Delete documents created before `cutoff`.
    async fn delete_expired_documents(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
