//! Job infrastructure for web acquisition work.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`JobStore`] - Persistence contract, with [`PostgresJobStore`] and [`MemoryJobStore`]
//! - [`JobRequest`] - Typed job input per job type
//! - [`JobRunner`] - Long-running service that claims and executes jobs
//! - [`QueueExecutor`] - Enqueue-and-wait façade for synchronous callers
//! - [`RetentionSweeper`] - Deletes expired jobs and documents
//!
//! # Architecture
//!
//! ```text
//! QueueExecutor.execute(request)
//!     │
//!     └─► JobStore.create_job (sync, elevated priority)
//!             ▲
//! JobRunner   │ poll
//!     │       │
//!     ├─► claim_pending_jobs (priority desc, created asc)
//!     ├─► executors::run_job ──► terminal status + output/error
//!     └─► RetentionSweeper.sweep (interval-gated)
//! ```

mod facade;
mod job;
mod memory;
mod postgres;
mod requests;
mod runner;
mod store;
mod sweeper;

pub use facade::QueueExecutor;
pub use job::{Document, Job, JobStatus, JobType, NewDocument, NewJob, PRIORITY_NORMAL, PRIORITY_SYNC};
pub use memory::{MemoryJobStore, DEFAULT_CLAIM_LEASE};
pub use postgres::{PostgresJobStore, MIGRATOR};
pub use requests::{
    BatchScrapeRequest, CrawlRequest, ExtractRequest, Format, JobRequest, JsonOptions,
    MapRequest, ScrapeOptions, ScrapeRequest, MAX_WORK_TIMEOUT,
};
pub use runner::JobRunner;
pub use store::JobStore;
pub use sweeper::{RetentionSweeper, SweepReport};
