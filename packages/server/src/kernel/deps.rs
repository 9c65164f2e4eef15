//! Worker dependencies for executors (using traits for testability)
//!
//! Everything an executor touches comes through this container: the job
//! store, the page fetcher, the optional LLM client and the worker config.

use discovery::fetchers::http::DEFAULT_USER_AGENT;
use discovery::{Discovery, Fetcher, LlmClient};
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::JobStore;

/// Worker dependencies accessible to executors
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub fetcher: Arc<dyn Fetcher>,
    /// LLM client for summary/json/branding and extract; absent when not configured
    pub llm: Option<Arc<dyn LlmClient>>,
    pub config: WorkerConfig,
}

impl WorkerDeps {
    pub fn new(store: Arc<dyn JobStore>, fetcher: Arc<dyn Fetcher>, config: WorkerConfig) -> Self {
        Self {
            store,
            fetcher,
            llm: None,
            config,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(self.fetcher.clone())
    }

    /// The LLM client, or `LLM_UNAVAILABLE` when none is configured.
    pub fn llm(&self) -> Result<&Arc<dyn LlmClient>, JobError> {
        self.llm.as_ref().ok_or_else(|| {
            JobError::new(
                ErrorCode::LlmUnavailable,
                "LLM features requested but no LLM client is configured",
            )
        })
    }

    pub fn user_agent(&self) -> &str {
        self.config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}
