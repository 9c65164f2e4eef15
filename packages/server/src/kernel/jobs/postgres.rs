//! Postgres-backed job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several workers can poll the same
//! table without dispatching a job twice. Status writes carry the allowed
//! predecessor states in their `WHERE` clause; a write that matches no row
//! is diagnosed afterwards into the precise store error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::job::{Document, Job, JobStatus, JobType, NewDocument, NewJob};
use super::memory::DEFAULT_CLAIM_LEASE;
use super::store::JobStore;
use crate::error::{StoreError, StoreResult};

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Explain why a guarded write touched no row.
    async fn diagnose(&self, id: Uuid, to: JobStatus) -> StoreError {
        let current = match self.get_job(id).await {
            Ok(job) => job,
            Err(e) => return e,
        };

        if to == JobStatus::Completed && current.status == JobStatus::Running {
            StoreError::MissingOutput(id)
        } else {
            StoreError::InvalidTransition {
                id,
                from: current.status,
                to,
            }
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, job_type, status, url, input, sync, priority, tenant_id)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.job_type)
        .bind(new.url)
        .bind(new.input)
        .bind(new.sync)
        .bind(new.priority)
        .bind(new.tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let error = match status {
            JobStatus::Pending => {
                return Err(self.diagnose(id, status).await);
            }
            JobStatus::Failed => Some(
                error
                    .filter(|e| !e.trim().is_empty())
                    .ok_or(StoreError::MissingError(id))?,
            ),
            JobStatus::Running | JobStatus::Completed => None,
        };

        let allowed: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                error = $3,
                output = CASE WHEN $2 = 'failed'::job_status THEN NULL ELSE output END,
                completed_at = CASE
                    WHEN $2 IN ('completed'::job_status, 'failed'::job_status) THEN NOW()
                    ELSE completed_at
                END,
                claimed_at = CASE WHEN $2 = 'running'::job_status THEN NOW() ELSE claimed_at END,
                updated_at = NOW()
            WHERE id = $1
              AND status::text = ANY($4)
              AND ($2 <> 'completed'::job_status OR output IS NOT NULL)
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(allowed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(id, status).await);
        }
        Ok(())
    }

    async fn set_output(&self, id: Uuid, output: &Value) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET output = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(output)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn claim_pending_jobs(&self, worker_id: &str, max: usize) -> StoreResult<Vec<Job>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND (claimed_at IS NULL
                       OR claimed_at < NOW() - ($2 || ' milliseconds')::INTERVAL)
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET worker_id = $3,
                claimed_at = NOW(),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(self.claim_lease.as_millis().to_string())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not preserve the CTE order
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn heartbeat(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_expired_running_jobs(&self, error: &str) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                output = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND COALESCE(claimed_at, updated_at) < NOW() - ($1 || ' milliseconds')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(self.claim_lease.as_millis().to_string())
        .bind(error)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn add_document(&self, new: NewDocument) -> StoreResult<Document> {
        let job_id = new.job_id;
        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents
                (id, job_id, url, markdown, html, raw_html, links, metadata, summary, json, branding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.job_id)
        .bind(new.url)
        .bind(new.markdown)
        .bind(new.html)
        .bind(new.raw_html)
        .bind(new.links)
        .bind(new.metadata)
        .bind(new.summary)
        .bind(new.json)
        .bind(new.branding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let orphan = matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation());
            if orphan {
                StoreError::NotFound(job_id)
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(document)
    }

    async fn list_documents(&self, job_id: Uuid) -> StoreResult<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    async fn delete_expired_jobs_by_type(
        &self,
        job_type: JobType,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE job_type = $1
              AND completed_at IS NOT NULL
              AND completed_at < $2
            "#,
        )
        .bind(job_type)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_documents(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
