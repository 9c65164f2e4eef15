//! Discovery engine: enumerate candidate URLs for a site.
//!
//! Sources, in order:
//! 1. `robots.txt` (rules and `Sitemap:` directives)
//! 2. sitemaps (robots directives plus `/sitemap.xml`, nested indexes)
//! 3. a breadth-first link crawl from the seed page
//!
//! Every candidate is normalized, deduplicated, scoped and checked
//! against robots before it is collected. The collector is capped, so a
//! run is bounded by `limit` and `timeout` and never by the size of the
//! site.

use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{DiscoveryError, DiscoveryResult, FetchError};
use crate::fetchers::http::DEFAULT_USER_AGENT;
use crate::robots::RobotsTxt;
use crate::sitemap::{parse_sitemap, Sitemap};
use crate::traits::fetcher::{FetchRequest, FetchedPage, Fetcher, DEFAULT_FETCH_TIMEOUT};
use crate::urls::{self, Scope};

/// Nested sitemap index levels followed below the root sitemaps.
pub const MAX_SITEMAP_DEPTH: usize = 3;

/// Sitemap documents fetched per run.
pub const MAX_SITEMAP_DOCUMENTS: usize = 50;

/// Oversampling factor when a search filter will discard candidates.
const SEARCH_OVERSAMPLE: usize = 10;

/// How sitemaps participate in discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SitemapMode {
    /// Sitemap plus link crawl
    #[default]
    Include,
    /// Sitemap only, no link crawl
    Only,
    /// Link crawl only
    Ignore,
}

/// Options for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub url: String,
    pub limit: usize,
    pub sitemap_mode: SitemapMode,
    pub include_subdomains: bool,
    pub allow_external: bool,
    pub ignore_query_params: bool,
    /// Case-insensitive substring filter on URL, title and description
    pub search: Option<String>,
    pub respect_robots: bool,
    pub timeout: Duration,
    pub user_agent: String,
    /// Link-following depth with the seed at depth 0. Pages shallower
    /// than this are fetched, so 0 skips the link crawl and 1 fetches the
    /// seed without following its links.
    pub max_depth: usize,
    /// Pages fetched concurrently during the link crawl
    pub concurrency: usize,
}

impl DiscoverOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            limit: 1000,
            sitemap_mode: SitemapMode::Include,
            include_subdomains: false,
            allow_external: false,
            ignore_query_params: false,
            search: None,
            respect_robots: true,
            timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_depth: 2,
            concurrency: 5,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_sitemap_mode(mut self, mode: SitemapMode) -> Self {
        self.sitemap_mode = mode;
        self
    }

    pub fn with_subdomains(mut self, include: bool) -> Self {
        self.include_subdomains = include;
        self
    }

    pub fn with_external(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }

    pub fn with_ignore_query_params(mut self, ignore: bool) -> Self {
        self.ignore_query_params = ignore;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = (!search.trim().is_empty()).then_some(search);
        self
    }

    pub fn with_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// A discovered link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DiscoveryLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
        }
    }

    fn matches(&self, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);
        hit(&self.url)
            || self.title.as_deref().is_some_and(hit)
            || self.description.as_deref().is_some_and(hit)
    }
}

/// Result of a discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOutput {
    pub links: Vec<DiscoveryLink>,
    /// Set whenever the result was degraded or cut short
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Why a bounded operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Cancelled,
    Deadline,
}

/// Race a future against the caller's token and the run deadline.
async fn bounded<T>(
    fut: impl Future<Output = T>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupted::Deadline),
        out = fut => Ok(out),
    }
}

enum RobotsFetch {
    Found(RobotsTxt),
    Absent,
    Failed(String),
}

#[derive(Default)]
struct SitemapReport {
    /// Valid page URLs listed across all sitemaps
    listed: usize,
    /// Sitemap documents successfully parsed
    parsed: usize,
    failures: Vec<String>,
    timed_out: bool,
}

#[derive(Default)]
struct CrawlReport {
    seed_error: Option<FetchError>,
    pages: usize,
    failed: usize,
    timed_out: bool,
}

/// Deduplicating, scoped, capped link collector.
///
/// Links are keyed by their normalized form; the stored URL is the first
/// form seen, fragment stripped, since that is the resource to fetch.
struct Collector<'a> {
    links: IndexMap<String, DiscoveryLink>,
    scope: &'a Scope,
    robots: Option<&'a RobotsTxt>,
    user_agent: &'a str,
    ignore_query: bool,
    cap: usize,
    robots_excluded: usize,
    overflowed: bool,
}

impl<'a> Collector<'a> {
    fn is_full(&self) -> bool {
        self.links.len() >= self.cap
    }

    fn allowed_by_robots(&self, url: &Url) -> bool {
        self.robots
            .map(|r| r.is_url_allowed(self.user_agent, url))
            .unwrap_or(true)
    }

    /// Record a link; returns true when it was new and accepted.
    fn add(&mut self, url: &Url, title: Option<&str>, description: Option<&str>) -> bool {
        if !self.scope.contains(url) {
            return false;
        }
        let key = urls::normalize(url, self.ignore_query);

        if let Some(existing) = self.links.get_mut(&key) {
            if existing.title.is_none() {
                existing.title = title.map(String::from);
            }
            if existing.description.is_none() {
                existing.description = description.map(String::from);
            }
            return false;
        }

        if !self.allowed_by_robots(url) {
            self.robots_excluded += 1;
            return false;
        }
        if self.is_full() {
            self.overflowed = true;
            return false;
        }

        self.insert(key, url, title, description);
        true
    }

    /// Record the seed. It is kept even when robots.txt disallows it.
    fn add_seed(&mut self, seed: &Url) {
        let key = urls::normalize(seed, self.ignore_query);
        if !self.links.contains_key(&key) && self.cap > 0 {
            self.insert(key, seed, None, None);
        }
    }

    fn insert(&mut self, key: String, url: &Url, title: Option<&str>, description: Option<&str>) {
        self.links.insert(
            key,
            DiscoveryLink {
                url: urls::without_fragment(url),
                title: title.map(String::from),
                description: description.map(String::from),
            },
        );
    }

    /// Fill in title and description for a fetched page's own entry.
    fn annotate(&mut self, requested: &Url, page: &FetchedPage) {
        let title = page.metadata.title.as_deref();
        let description = page.metadata.description.as_deref();
        for url in [Some(requested.clone()), urls::parse_http(&page.url)]
            .into_iter()
            .flatten()
        {
            let key = urls::normalize(&url, self.ignore_query);
            if let Some(existing) = self.links.get_mut(&key) {
                if existing.title.is_none() {
                    existing.title = title.map(String::from);
                }
                if existing.description.is_none() {
                    existing.description = description.map(String::from);
                }
            }
        }
    }
}

/// Discovery engine over a pluggable fetcher.
#[derive(Clone)]
pub struct Discovery {
    fetcher: Arc<dyn Fetcher>,
}

impl Discovery {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    fn request(&self, url: &str, opts: &DiscoverOptions, deadline: Instant) -> FetchRequest {
        let remaining = deadline.saturating_duration_since(Instant::now());
        FetchRequest::new(url)
            .with_timeout(remaining.min(DEFAULT_FETCH_TIMEOUT))
            .with_user_agent(opts.user_agent.clone())
    }

    /// Discover links for a site.
    ///
    /// Fails only when the seed is invalid, the run is cancelled, or the
    /// seed page is unreachable and no sitemap listed any URL. Every other
    /// degradation is reported through [`DiscoveryOutput::warning`].
    pub async fn discover(
        &self,
        opts: &DiscoverOptions,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<DiscoveryOutput> {
        let seed = urls::parse_http(&opts.url).ok_or_else(|| DiscoveryError::InvalidSeed {
            url: opts.url.clone(),
        })?;
        let deadline = Instant::now() + opts.timeout;
        let scope = Scope::new(&seed, opts.include_subdomains, opts.allow_external);
        let mut warnings: Vec<String> = Vec::new();

        info!(
            url = %seed,
            limit = opts.limit,
            sitemap_mode = ?opts.sitemap_mode,
            max_depth = opts.max_depth,
            "Starting discovery"
        );

        let robots = if opts.respect_robots || opts.sitemap_mode != SitemapMode::Ignore {
            match self.load_robots(&seed, opts, deadline, cancel).await? {
                RobotsFetch::Found(robots) => Some(robots),
                RobotsFetch::Absent => None,
                RobotsFetch::Failed(reason) => {
                    if opts.respect_robots {
                        warn!(url = %seed, reason = %reason, "robots.txt unavailable, proceeding without rules");
                        warnings.push(format!(
                            "robots.txt unavailable ({}); proceeding without robots rules",
                            reason
                        ));
                    }
                    None
                }
            }
        } else {
            None
        };

        let cap = match opts.search {
            Some(_) => opts.limit.saturating_mul(SEARCH_OVERSAMPLE),
            None => opts.limit,
        };
        let mut collector = Collector {
            links: IndexMap::new(),
            scope: &scope,
            robots: robots.as_ref().filter(|_| opts.respect_robots),
            user_agent: &opts.user_agent,
            ignore_query: opts.ignore_query_params,
            cap,
            robots_excluded: 0,
            overflowed: false,
        };

        let seed_allowed = collector.allowed_by_robots(&seed);
        collector.add_seed(&seed);
        if !seed_allowed {
            warn!(url = %seed, "Seed URL disallowed by robots.txt");
            warnings.push("seed URL disallowed by robots.txt; its links were not followed".into());
        }

        let mut sitemap = SitemapReport::default();
        if opts.sitemap_mode != SitemapMode::Ignore {
            sitemap = self
                .collect_sitemaps(&seed, robots.as_ref(), opts, deadline, cancel, &mut collector)
                .await?;
            if !sitemap.failures.is_empty() {
                warnings.push(format!(
                    "sitemap fetch failed: {}",
                    sitemap
                        .failures
                        .iter()
                        .take(3)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
            if opts.sitemap_mode == SitemapMode::Only && sitemap.parsed == 0 {
                warnings.push("no sitemap found; returned the seed URL only".into());
            }
        }

        let mut crawl = CrawlReport::default();
        if opts.sitemap_mode != SitemapMode::Only
            && opts.max_depth > 0
            && seed_allowed
            && !sitemap.timed_out
        {
            crawl = self
                .crawl_links(&seed, opts, deadline, cancel, &mut collector)
                .await?;

            if let Some(error) = crawl.seed_error.take() {
                if sitemap.listed == 0 {
                    warn!(url = %seed, error = %error, "Seed unreachable and no sitemap links");
                    return Err(DiscoveryError::SeedUnreachable {
                        url: seed.to_string(),
                        source: error,
                    });
                }
                warnings.push(format!("seed page unreachable ({}); using sitemap links only", error));
            }
        }

        if collector.robots_excluded > 0 {
            warnings.push(format!(
                "{} URLs excluded by robots.txt",
                collector.robots_excluded
            ));
        }
        if sitemap.timed_out || crawl.timed_out {
            warnings.push(format!(
                "discovery timed out after {:?}; results are partial",
                opts.timeout
            ));
        }

        let overflowed = collector.overflowed;
        let mut links: Vec<DiscoveryLink> = collector.links.into_values().collect();
        if let Some(search) = &opts.search {
            let needle = search.to_lowercase();
            links.retain(|link| link.matches(&needle));
            if overflowed && links.len() < opts.limit {
                warnings.push(format!(
                    "search scanned the first {} candidate URLs only",
                    cap
                ));
            }
        }

        if links.len() > opts.limit || (overflowed && opts.search.is_none()) {
            links.truncate(opts.limit);
            warnings.push(format!("results truncated to limit of {}", opts.limit));
        }

        info!(
            url = %seed,
            links = links.len(),
            sitemap_urls = sitemap.listed,
            pages_crawled = crawl.pages,
            pages_failed = crawl.failed,
            "Discovery complete"
        );

        Ok(DiscoveryOutput {
            links,
            warning: (!warnings.is_empty()).then(|| warnings.join("; ")),
        })
    }

    async fn load_robots(
        &self,
        seed: &Url,
        opts: &DiscoverOptions,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<RobotsFetch> {
        let robots_url = format!("{}/robots.txt", urls::origin(seed));
        let request = self.request(&robots_url, opts, deadline);

        match bounded(self.fetcher.fetch_text(&request), deadline, cancel).await {
            Err(Interrupted::Cancelled) => Err(DiscoveryError::Cancelled),
            Err(Interrupted::Deadline) => Ok(RobotsFetch::Failed("timed out".into())),
            Ok(Ok(Some(body))) => {
                debug!(url = %robots_url, "Parsed robots.txt");
                Ok(RobotsFetch::Found(RobotsTxt::parse(&body)))
            }
            Ok(Ok(None)) => Ok(RobotsFetch::Absent),
            Ok(Err(e)) => Ok(RobotsFetch::Failed(e.to_string())),
        }
    }

    async fn collect_sitemaps(
        &self,
        seed: &Url,
        robots: Option<&RobotsTxt>,
        opts: &DiscoverOptions,
        deadline: Instant,
        cancel: &CancellationToken,
        collector: &mut Collector<'_>,
    ) -> DiscoveryResult<SitemapReport> {
        let mut report = SitemapReport::default();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        let default_sitemap = format!("{}/sitemap.xml", urls::origin(seed));
        for root in robots
            .map(|r| r.sitemaps().to_vec())
            .unwrap_or_default()
            .into_iter()
            .chain(std::iter::once(default_sitemap))
        {
            if urls::parse_http(&root).is_some() && seen.insert(root.clone()) {
                queue.push_back((root, 0));
            }
        }

        let mut fetched = 0;
        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if fetched >= MAX_SITEMAP_DOCUMENTS || collector.is_full() {
                break;
            }
            fetched += 1;

            let request = self.request(&sitemap_url, opts, deadline);
            let body = match bounded(self.fetcher.fetch_text(&request), deadline, cancel).await {
                Err(Interrupted::Cancelled) => return Err(DiscoveryError::Cancelled),
                Err(Interrupted::Deadline) => {
                    report.timed_out = true;
                    break;
                }
                Ok(Ok(Some(body))) => body,
                Ok(Ok(None)) => {
                    debug!(url = %sitemap_url, "Sitemap not found");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(url = %sitemap_url, error = %e, "Sitemap fetch failed");
                    report.failures.push(e.to_string());
                    continue;
                }
            };

            match parse_sitemap(&body) {
                Ok(Sitemap::UrlSet(locs)) => {
                    report.parsed += 1;
                    for loc in locs {
                        if let Some(url) = urls::parse_http(&loc) {
                            report.listed += 1;
                            collector.add(&url, None, None);
                        }
                    }
                }
                Ok(Sitemap::Index(children)) => {
                    report.parsed += 1;
                    if depth >= MAX_SITEMAP_DEPTH {
                        debug!(url = %sitemap_url, "Sitemap index nesting limit reached");
                        continue;
                    }
                    for child in children {
                        if urls::parse_http(&child).is_some() && seen.insert(child.clone()) {
                            queue.push_back((child, depth + 1));
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %sitemap_url, error = %e, "Sitemap unparseable");
                    report.failures.push(format!("{}: {}", sitemap_url, e));
                }
            }
        }

        debug!(
            documents = report.parsed,
            urls = report.listed,
            "Sitemap collection finished"
        );
        Ok(report)
    }

    async fn crawl_links(
        &self,
        seed: &Url,
        opts: &DiscoverOptions,
        deadline: Instant,
        cancel: &CancellationToken,
        collector: &mut Collector<'_>,
    ) -> DiscoveryResult<CrawlReport> {
        let mut report = CrawlReport::default();
        let mut visited = HashSet::from([urls::normalize(seed, opts.ignore_query_params)]);
        let mut frontier = vec![seed.clone()];
        let mut depth = 0;

        while !frontier.is_empty() && !collector.is_full() {
            let level = std::mem::take(&mut frontier);
            debug!(depth, pages = level.len(), "Crawling discovery level");

            let mut results = stream::iter(level)
                .map(|url| async move {
                    let request = self.request(url.as_str(), opts, deadline);
                    let result = bounded(self.fetcher.fetch(&request), deadline, cancel).await;
                    (url, result)
                })
                .buffer_unordered(opts.concurrency.max(1));

            while let Some((url, result)) = results.next().await {
                let page = match result {
                    Err(Interrupted::Cancelled) => return Err(DiscoveryError::Cancelled),
                    Err(Interrupted::Deadline) => {
                        if depth == 0 {
                            report.seed_error = Some(FetchError::Timeout {
                                url: url.to_string(),
                            });
                        }
                        report.timed_out = true;
                        break;
                    }
                    Ok(Err(e)) => {
                        if depth == 0 {
                            report.seed_error = Some(e);
                        } else {
                            debug!(url = %url, error = %e, "Discovery fetch failed");
                            report.failed += 1;
                        }
                        continue;
                    }
                    Ok(Ok(page)) => page,
                };

                report.pages += 1;
                collector.annotate(&url, &page);

                for link in page.links.iter().filter_map(|l| urls::parse_http(l)) {
                    collector.add(&link, None, None);

                    let follow = depth + 1 < opts.max_depth
                        && collector.scope.is_site(&link)
                        && !urls::is_asset(&link)
                        && collector.allowed_by_robots(&link)
                        && visited.insert(urls::normalize(&link, opts.ignore_query_params));
                    if follow {
                        frontier.push(link);
                    }
                }

                if collector.is_full() {
                    break;
                }
            }

            if report.timed_out {
                break;
            }
            frontier.truncate(collector.cap);
            depth += 1;
        }

        Ok(report)
    }
}
