//! Batch scrape: a fixed URL list through the fetch pool.

use discovery::FetchPool;
use serde_json::Value;
use tracing::info;

use super::documents::fetch_and_store;
use super::{to_output, JobContext};
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::BatchScrapeRequest;

pub async fn run(ctx: &JobContext, request: BatchScrapeRequest) -> Result<Value, JobError> {
    if request.options.needs_llm() {
        ctx.deps.llm()?;
    }

    let pool = FetchPool::capped(
        request.max_concurrency,
        ctx.deps.config.max_concurrent_urls_per_job,
    );
    let output = fetch_and_store(ctx, request.urls, &request.options, pool).await;
    ctx.check_cancelled()?;

    if output.documents == 0 {
        return Err(JobError::new(
            ErrorCode::BatchScrapeEmptyResult,
            format!("no URLs fetched successfully ({} attempted)", output.attempted),
        ));
    }

    info!(
        job_id = %ctx.job_id,
        documents = output.documents,
        failed = output.failed,
        "Batch scrape finished"
    );
    to_output(&output)
}
