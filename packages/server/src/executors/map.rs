//! Map: list a site's URLs without fetching their content.

use discovery::{DiscoverOptions, DiscoveryError};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::{cancelled, to_output, JobContext};
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::MapRequest;

/// Share of the work timeout discovery may use, so it can return partial
/// results before the job itself times out.
pub(crate) fn discovery_budget(work_timeout: Duration) -> Duration {
    work_timeout.mul_f64(0.9)
}

pub(crate) fn discovery_error(code: ErrorCode, error: DiscoveryError) -> JobError {
    match error {
        DiscoveryError::Cancelled => cancelled(),
        other => JobError::new(code, other.to_string()),
    }
}

pub async fn run(ctx: &JobContext, request: MapRequest) -> Result<Value, JobError> {
    let config = &ctx.deps.config;
    let budget = discovery_budget(ctx.work_timeout);
    let timeout = request
        .timeout
        .map_or(budget, |ms| Duration::from_millis(ms).min(budget));

    let mut options = DiscoverOptions::new(&request.url)
        .with_limit(request.limit.unwrap_or(config.default_map_limit))
        .with_sitemap_mode(request.sitemap)
        .with_subdomains(request.include_subdomains)
        .with_external(request.allow_external_links)
        .with_ignore_query_params(request.ignore_query_parameters)
        .with_robots(config.respect_robots)
        .with_timeout(timeout)
        .with_user_agent(ctx.deps.user_agent())
        .with_max_depth(config.default_crawl_depth)
        .with_concurrency(config.max_concurrent_urls_per_job);
    if let Some(search) = request.search {
        options = options.with_search(search);
    }

    let output = ctx
        .deps
        .discovery()
        .discover(&options, &ctx.cancel)
        .await
        .map_err(|e| discovery_error(ErrorCode::MapFailed, e))?;

    info!(
        job_id = %ctx.job_id,
        links = output.links.len(),
        warning = output.warning.as_deref().unwrap_or(""),
        "Map finished"
    );
    to_output(&output)
}
