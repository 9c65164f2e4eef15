//! Retention sweeper: deletes finished jobs and documents past their TTL.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::job::JobType;
use super::store::JobStore;
use crate::config::RetentionConfig;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs: BTreeMap<&'static str, u64>,
    pub documents: u64,
    /// Deletions that failed; the rest of the sweep still ran
    pub errors: usize,
}

impl SweepReport {
    pub fn jobs_deleted(&self) -> u64 {
        self.jobs.values().sum()
    }
}

pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn JobStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Delete everything that expired before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for job_type in JobType::ALL {
            let Some(cutoff) = cutoff(now, self.config.for_type(job_type)) else {
                continue;
            };

            match self.store.delete_expired_jobs_by_type(job_type, cutoff).await {
                Ok(count) => {
                    if count > 0 {
                        report.jobs.insert(job_type.as_str(), count);
                    }
                }
                Err(e) => {
                    warn!(job_type = %job_type, error = %e, "Failed to sweep expired jobs");
                    report.errors += 1;
                }
            }
        }

        if let Some(cutoff) = cutoff(now, self.config.documents()) {
            match self.store.delete_expired_documents(cutoff).await {
                Ok(count) => report.documents = count,
                Err(e) => {
                    warn!(error = %e, "Failed to sweep expired documents");
                    report.errors += 1;
                }
            }
        }

        if report.jobs_deleted() > 0 || report.documents > 0 {
            info!(
                jobs = report.jobs_deleted(),
                documents = report.documents,
                "Retention sweep removed expired rows"
            );
        } else {
            debug!("Retention sweep found nothing to remove");
        }

        report
    }
}

fn cutoff(now: DateTime<Utc>, ttl: Option<std::time::Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_sub_signed(ttl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobStatus, MemoryJobStore, NewDocument, NewJob};
    use serde_json::json;

    async fn finished(store: &MemoryJobStore, job_type: JobType) -> uuid::Uuid {
        let job = store
            .create_job(NewJob::builder().job_type(job_type).input(json!({})).build())
            .await
            .unwrap();
        store
            .update_status(job.id, JobStatus::Failed, Some("SCRAPE_FAILED: gone"))
            .await
            .unwrap();
        job.id
    }

    #[tokio::test]
    async fn test_sweep_honours_per_type_ttl() {
        let store = Arc::new(MemoryJobStore::new());
        let scrape = finished(&store, JobType::Scrape).await;
        let crawl = finished(&store, JobType::Crawl).await;
        store
            .add_document(NewDocument::builder().job_id(crawl).url("https://a.com").build())
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), RetentionConfig::default());

        // 25 hours later only the 24h scrape TTL has passed
        let report = sweeper.sweep(Utc::now() + chrono::Duration::hours(25)).await;
        assert_eq!(report.jobs.get("scrape"), Some(&1));
        assert_eq!(report.jobs.get("crawl"), None);
        assert_eq!(report.documents, 0);
        assert!(store.get_job(scrape).await.is_err());
        assert!(store.get_job(crawl).await.is_ok());

        let report = sweeper.sweep(Utc::now() + chrono::Duration::hours(169)).await;
        assert_eq!(report.jobs.get("crawl"), Some(&1));
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_sweep() {
        let store = Arc::new(MemoryJobStore::new());
        let scrape = finished(&store, JobType::Scrape).await;

        let config = RetentionConfig {
            scrape_hours: 0,
            ..Default::default()
        };
        let report = RetentionSweeper::new(store.clone(), config)
            .sweep(Utc::now() + chrono::Duration::days(365))
            .await;

        assert_eq!(report.jobs.get("scrape"), None);
        assert!(store.get_job(scrape).await.is_ok());
    }

    #[tokio::test]
    async fn test_unfinished_jobs_are_never_swept() {
        let store = Arc::new(MemoryJobStore::new());
        let pending = store
            .create_job(NewJob::builder().job_type(JobType::Map).input(json!({})).build())
            .await
            .unwrap();

        let report = RetentionSweeper::new(store.clone(), RetentionConfig::default())
            .sweep(Utc::now() + chrono::Duration::days(365))
            .await;

        assert_eq!(report.jobs_deleted(), 0);
        assert!(store.get_job(pending.id).await.is_ok());
    }
}
