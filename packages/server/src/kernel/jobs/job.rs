//! Job and document models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::JobError;

/// Priority for background submissions.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority for jobs a caller is waiting on synchronously.
pub const PRIORITY_SYNC: i32 = 10;

// ============================================================================
// Enums
// ============================================================================

/// Kind of work a job performs. Selects the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scrape,
    Map,
    Crawl,
    Extract,
    BatchScrape,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Scrape,
        JobType::Map,
        JobType::Crawl,
        JobType::Extract,
        JobType::BatchScrape,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scrape => "scrape",
            JobType::Map => "map",
            JobType::Crawl => "crawl",
            JobType::Extract => "extract",
            JobType::BatchScrape => "batch_scrape",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only lifecycle: pending -> running -> {completed, failed}.
///
/// A pending job may also fail directly when its input cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// States a job must be in to move to `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending],
            JobStatus::Completed => &[JobStatus::Running],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub url: Option<String>,

    /// Original request body, re-read by the executor
    pub input: serde_json::Value,
    /// Written once, only on completion
    pub output: Option<serde_json::Value>,
    /// `"<CODE>: <message>"`, written only on failure
    pub error: Option<String>,

    pub sync: bool,
    pub priority: i32,
    pub tenant_id: Option<String>,

    // Claim bookkeeping
    pub worker_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Structured view of the stored error string.
    pub fn job_error(&self) -> Option<JobError> {
        self.error.as_deref().map(JobError::parse)
    }
}

/// Insert payload for a job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub job_type: JobType,
    #[builder(default)]
    pub url: Option<String>,
    pub input: serde_json::Value,
    #[builder(default)]
    pub sync: bool,
    #[builder(default = PRIORITY_NORMAL)]
    pub priority: i32,
    #[builder(default)]
    pub tenant_id: Option<String>,
}

// ============================================================================
// Document Model
// ============================================================================

/// One fetched page belonging to a crawl or batch-scrape job.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub job_id: Uuid,
    pub url: String,
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub raw_html: Option<String>,
    pub links: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub summary: Option<String>,
    pub json: Option<serde_json::Value>,
    pub branding: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct NewDocument {
    #[builder(!default)]
    pub job_id: Uuid,
    #[builder(!default)]
    pub url: String,
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub raw_html: Option<String>,
    pub links: Option<serde_json::Value>,
    #[builder(default = serde_json::Value::Object(Default::default()))]
    pub metadata: serde_json::Value,
    pub summary: Option<String>,
    pub json: Option<serde_json::Value>,
    pub branding: Option<serde_json::Value>,
}
