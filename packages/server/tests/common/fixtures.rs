//! Test fixtures for running jobs against in-memory collaborators.
//!
//! `TestWorker` wires a `MemoryJobStore`, a `MockFetcher` and an optional
//! `MockLlm` into `WorkerDeps`, so executors run end to end without
//! network or database access.

#![allow(dead_code)]

use discovery::testing::{MockFetcher, MockLlm};
use discovery::LlmClient;
use scrape_core::executors::run_job;
use scrape_core::kernel::jobs::{Job, JobRequest, JobStore, MemoryJobStore, NewJob};
use scrape_core::kernel::WorkerDeps;
use scrape_core::WorkerConfig;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Worker config with short intervals for tests.
pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(2),
        sync_wait_timeout: Duration::from_secs(2),
        sync_poll_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub struct TestWorker {
    pub store: Arc<MemoryJobStore>,
    pub fetcher: MockFetcher,
    pub llm: Option<MockLlm>,
    pub deps: Arc<WorkerDeps>,
}

impl TestWorker {
    /// Worker with an LLM that answers every request.
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::build(fetcher, Some(MockLlm::new()), test_config())
    }

    pub fn without_llm(fetcher: MockFetcher) -> Self {
        Self::build(fetcher, None, test_config())
    }

    pub fn build(fetcher: MockFetcher, llm: Option<MockLlm>, config: WorkerConfig) -> Self {
        let store = Arc::new(MemoryJobStore::new().with_claim_lease(config.claim_lease));
        let mut deps = WorkerDeps::new(store.clone(), Arc::new(fetcher.clone()), config);
        if let Some(llm) = &llm {
            let client: Arc<dyn LlmClient> = Arc::new(llm.clone());
            deps = deps.with_llm(client);
        }

        Self {
            store,
            fetcher,
            llm,
            deps: Arc::new(deps),
        }
    }

    /// Insert a pending job for a typed request.
    pub async fn enqueue(&self, request: &JobRequest) -> Job {
        let new = NewJob::builder()
            .job_type(request.job_type())
            .url(request.url().map(str::to_string))
            .input(request.to_input().expect("request encodes"))
            .build();
        self.store.create_job(new).await.expect("job created")
    }

    /// Insert a pending job with raw input, bypassing request encoding.
    pub async fn enqueue_raw(&self, job_type: scrape_core::kernel::jobs::JobType, input: Value) -> Job {
        let new = NewJob::builder().job_type(job_type).input(input).build();
        self.store.create_job(new).await.expect("job created")
    }

    /// Run a job to completion and return its final row.
    pub async fn run(&self, request: &JobRequest) -> Job {
        let job = self.enqueue(request).await;
        self.run_existing(job, CancellationToken::new()).await
    }

    pub async fn run_existing(&self, job: Job, cancel: CancellationToken) -> Job {
        let id = job.id;
        run_job(self.deps.clone(), job, cancel)
            .await
            .expect("terminal status recorded");
        self.store.get_job(id).await.expect("job exists")
    }
}

/// Decode a typed request from its JSON wire shape.
pub fn request(job_type: scrape_core::kernel::jobs::JobType, input: Value) -> JobRequest {
    JobRequest::decode(job_type, &input).expect("valid request")
}
