//! Crawl: discover a site's URLs, then fetch and persist each page.

use discovery::{DiscoverOptions, FetchPool};
use serde_json::Value;
use tracing::info;

use super::documents::fetch_and_store;
use super::map::discovery_error;
use super::{to_output, JobContext};
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::CrawlRequest;

pub async fn run(ctx: &JobContext, request: CrawlRequest) -> Result<Value, JobError> {
    if request.scrape_options.needs_llm() {
        ctx.deps.llm()?;
    }

    let config = &ctx.deps.config;
    let limit = request.limit.unwrap_or(config.default_crawl_limit);
    let pool = FetchPool::capped(request.max_concurrency, config.max_concurrent_urls_per_job);

    // discovery gets at most one page budget, and never more than half the run
    let discovery_timeout = config.job_timeout.min(ctx.work_timeout / 2);

    let options = DiscoverOptions::new(&request.url)
        .with_limit(limit)
        .with_sitemap_mode(request.sitemap)
        .with_subdomains(request.include_subdomains || request.crawl_entire_domain)
        .with_external(request.allow_external_links)
        .with_ignore_query_params(request.ignore_query_parameters)
        .with_robots(config.respect_robots)
        .with_timeout(discovery_timeout)
        .with_user_agent(ctx.deps.user_agent())
        .with_max_depth(request.max_depth.unwrap_or(config.default_crawl_depth))
        .with_concurrency(pool.concurrency());

    let discovered = ctx
        .deps
        .discovery()
        .discover(&options, &ctx.cancel)
        .await
        .map_err(|e| discovery_error(ErrorCode::CrawlDiscoveryFailed, e))?;

    let urls: Vec<String> = discovered.links.into_iter().map(|link| link.url).collect();
    info!(
        job_id = %ctx.job_id,
        urls = urls.len(),
        concurrency = pool.concurrency(),
        "Crawl discovery finished"
    );

    let mut output = fetch_and_store(ctx, urls, &request.scrape_options, pool).await;
    ctx.check_cancelled()?;

    if output.documents == 0 {
        return Err(JobError::new(
            ErrorCode::CrawlEmptyResult,
            format!("no pages fetched successfully ({} attempted)", output.attempted),
        ));
    }

    output.warning = match (discovered.warning, output.warning.take()) {
        (Some(a), Some(b)) => Some(format!("{a}; {b}")),
        (a, b) => a.or(b),
    };
    info!(
        job_id = %ctx.job_id,
        documents = output.documents,
        failed = output.failed,
        "Crawl finished"
    );
    to_output(&output)
}
