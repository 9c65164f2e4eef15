//! Single-page scrape.

use discovery::{Engine, FetchError, FetchRequest, FetchedPage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::documents::DocumentOutput;
use super::enrich;
use super::{cancelled, to_output, JobContext};
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::{Format, ScrapeOptions, ScrapeRequest};

/// A failed page fetch, with the upstream status when there was one.
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub error: JobError,
    pub status_code: Option<u16>,
}

impl From<PageFailure> for JobError {
    fn from(failure: PageFailure) -> Self {
        failure.error
    }
}

impl From<JobError> for PageFailure {
    fn from(error: JobError) -> Self {
        Self {
            error,
            status_code: None,
        }
    }
}

pub(crate) fn fetch_request(ctx: &JobContext, url: &str, options: &ScrapeOptions) -> FetchRequest {
    let config = &ctx.deps.config;
    let mut request = FetchRequest::new(url)
        .with_timeout(options.page_timeout(config.job_timeout))
        .with_user_agent(ctx.deps.user_agent())
        .with_headers(options.headers.clone());

    if let Some(engine) = options.engine {
        request = request.with_engine(engine);
    }
    if options.wants(Format::Screenshot) {
        request = request.with_screenshot();
    }
    request
}

/// Fetch one page with the job's fetcher, honoring the browser switch.
pub(crate) async fn fetch_page(
    ctx: &JobContext,
    url: &str,
    options: &ScrapeOptions,
    cancel: &CancellationToken,
) -> Result<FetchedPage, PageFailure> {
    let request = fetch_request(ctx, url, options);

    if request.engine == Engine::Browser && !ctx.deps.config.browser_enabled {
        let reason = if request.screenshot {
            "screenshot requires the browser engine, which is disabled"
        } else {
            "browser engine is disabled"
        };
        return Err(JobError::new(ErrorCode::BrowserDisabled, reason).into());
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled().into()),
        result = ctx.deps.fetcher.fetch(&request) => result,
    };

    result.map_err(|e| PageFailure {
        status_code: e.status_code(),
        error: match e {
            FetchError::EngineUnavailable { engine } => JobError::new(
                ErrorCode::BrowserDisabled,
                format!("{engine} engine is not available"),
            ),
            FetchError::Cancelled => cancelled(),
            other => JobError::new(ErrorCode::ScrapeFailed, other.to_string()),
        },
    })
}

pub async fn run(ctx: &JobContext, request: ScrapeRequest) -> Result<Value, JobError> {
    let options = &request.options;
    let llm = if options.needs_llm() {
        Some(ctx.deps.llm()?.clone())
    } else {
        None
    };

    let page = fetch_page(ctx, &request.url, options, &ctx.cancel).await?;
    let content = page.content().to_string();
    let mut document = DocumentOutput::shape(page, options);

    if let Some(llm) = llm {
        let enrichment = enrich::enrich(
            llm.as_ref(),
            &request.url,
            &content,
            options,
            ctx.deps.config.job_timeout,
            &ctx.cancel,
        )
        .await
        .into_strict()?;
        document.apply(enrichment);
    }

    to_output(&document)
}
