//! In-memory job store.
//!
//! Used by tests and by the worker when no database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::job::{Document, Job, JobStatus, JobType, NewDocument, NewJob};
use super::store::JobStore;
use crate::error::{StoreError, StoreResult};

pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    documents: Vec<Document>,
}

pub struct MemoryJobStore {
    state: RwLock<State>,
    claim_lease: Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// All jobs, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    fn lease_expired(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.claim_lease)
            .map(|lease| at + lease < now)
            .unwrap_or(false)
    }

    fn claimable(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if job.status != JobStatus::Pending {
            return false;
        }
        job.claimed_at.map_or(true, |at| self.lease_expired(at, now))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let now = Utc::now();
        let job = Job {
            id: new.id,
            job_type: new.job_type,
            status: JobStatus::Pending,
            url: new.url,
            input: new.input,
            output: None,
            error: None,
            sync: new.sync,
            priority: new.priority,
            tenant_id: new.tenant_id,
            worker_id: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.state.write().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Job> {
        self.state
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !job.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }

        let now = Utc::now();
        match status {
            JobStatus::Failed => {
                let error = error
                    .filter(|e| !e.trim().is_empty())
                    .ok_or(StoreError::MissingError(id))?;
                job.error = Some(error.to_string());
                job.output = None;
                job.completed_at = Some(now);
            }
            JobStatus::Completed => {
                if job.output.is_none() {
                    return Err(StoreError::MissingOutput(id));
                }
                job.error = None;
                job.completed_at = Some(now);
            }
            // the lease of a running job counts from its start
            JobStatus::Running => job.claimed_at = Some(now),
            JobStatus::Pending => {}
        }

        job.status = status;
        job.updated_at = now;
        Ok(())
    }

    async fn set_output(&self, id: Uuid, output: &Value) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status != JobStatus::Running {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Completed,
            });
        }

        job.output = Some(output.clone());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_pending_jobs(&self, worker_id: &str, max: usize) -> StoreResult<Vec<Job>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut ids: Vec<(i32, DateTime<Utc>, Uuid)> = state
            .jobs
            .values()
            .filter(|job| self.claimable(job, now))
            .map(|job| (job.priority, job.created_at, job.id))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        ids.truncate(max);

        let mut claimed = Vec::with_capacity(ids.len());
        for (_, _, id) in ids {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.worker_id = Some(worker_id.to_string());
                job.claimed_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(&id).filter(|j| j.status == JobStatus::Running) {
            let now = Utc::now();
            job.claimed_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn fail_expired_running_jobs(&self, error: &str) -> StoreResult<Vec<Uuid>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut failed = Vec::new();
        for job in state.jobs.values_mut() {
            let last_beat = job.claimed_at.unwrap_or(job.updated_at);
            if job.status == JobStatus::Running && self.lease_expired(last_beat, now) {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.output = None;
                job.completed_at = Some(now);
                job.updated_at = now;
                failed.push(job.id);
            }
        }
        Ok(failed)
    }

    async fn add_document(&self, new: NewDocument) -> StoreResult<Document> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&new.job_id) {
            return Err(StoreError::NotFound(new.job_id));
        }

        let document = Document {
            id: Uuid::now_v7(),
            job_id: new.job_id,
            url: new.url,
            markdown: new.markdown,
            html: new.html,
            raw_html: new.raw_html,
            links: new.links,
            metadata: new.metadata,
            summary: new.summary,
            json: new.json,
            branding: new.branding,
            created_at: Utc::now(),
        };
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn list_documents(&self, job_id: Uuid) -> StoreResult<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|d| d.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_expired_jobs_by_type(
        &self,
        job_type: JobType,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;

        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| {
                job.job_type == job_type && job.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
        }
        // documents follow their job
        state.documents.retain(|d| !expired.contains(&d.job_id));

        Ok(expired.len() as u64)
    }

    async fn delete_expired_documents(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.documents.len();
        state.documents.retain(|d| d.created_at >= cutoff);
        Ok((before - state.documents.len()) as u64)
    }
}
