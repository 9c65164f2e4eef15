//! Decoded job inputs.
//!
//! A job's `input` column holds the original request body. [`JobRequest`]
//! turns it back into one typed variant per job type so executor dispatch
//! is an exhaustive match.

use discovery::{urls, Engine, SitemapMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::job::JobType;
use crate::config::WorkerConfig;
use crate::error::{ErrorCode, JobError};

/// Upper bound on any job's work timeout.
pub const MAX_WORK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Output formats a page can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Format {
    Markdown,
    Html,
    RawHtml,
    Links,
    Screenshot,
    Summary,
    Json,
    Branding,
}

impl Format {
    /// Formats produced by an LLM call.
    pub fn needs_llm(&self) -> bool {
        matches!(self, Format::Summary | Format::Json | Format::Branding)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Per-page options shared by scrape, crawl and batch-scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    #[serde(default = "default_formats")]
    pub formats: Vec<Format>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_options: Option<JsonOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    /// Per-page fetch timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_formats() -> Vec<Format> {
    vec![Format::Markdown]
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            headers: HashMap::new(),
            json_options: None,
            engine: None,
            timeout: None,
        }
    }
}

impl ScrapeOptions {
    pub fn wants(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }

    pub fn needs_llm(&self) -> bool {
        self.formats.iter().any(Format::needs_llm)
    }

    pub fn page_timeout(&self, default: Duration) -> Duration {
        self.timeout.map_or(default, Duration::from_millis)
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.wants(Format::Json) {
            let usable = self
                .json_options
                .as_ref()
                .is_some_and(|o| o.schema.is_some() || o.prompt.is_some());
            if !usable {
                return Err(invalid("json format requires jsonOptions with a schema or prompt"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sitemap: SitemapMode,
    #[serde(default)]
    pub include_subdomains: bool,
    #[serde(default)]
    pub allow_external_links: bool,
    #[serde(default = "default_true")]
    pub ignore_query_parameters: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Discovery timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub sitemap: SitemapMode,
    #[serde(default)]
    pub include_subdomains: bool,
    #[serde(default)]
    pub allow_external_links: bool,
    /// Treat every subdomain of the seed as in scope
    #[serde(default)]
    pub crawl_entire_domain: bool,
    #[serde(default)]
    pub ignore_query_parameters: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Whole-job timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScrapeRequest {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Record per-URL failures instead of failing the job
    #[serde(rename = "ignoreInvalidURLs", default)]
    pub ignore_invalid_urls: bool,
    #[serde(default)]
    pub show_sources: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Whole-job timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn invalid(message: impl AsRef<str>) -> JobError {
    JobError::new(ErrorCode::InvalidJobInput, message)
}

fn require_http(url: &str) -> Result<(), JobError> {
    match urls::parse_http(url) {
        Some(_) => Ok(()),
        None => Err(invalid(format!("not an absolute http(s) URL: {url}"))),
    }
}

/// A job's input, decoded by job type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Scrape(ScrapeRequest),
    Map(MapRequest),
    Crawl(CrawlRequest),
    BatchScrape(BatchScrapeRequest),
    Extract(ExtractRequest),
}

impl JobRequest {
    /// Decode and validate a stored input. Failures are `INVALID_JOB_INPUT`.
    pub fn decode(job_type: JobType, input: &Value) -> Result<Self, JobError> {
        fn parse<T: serde::de::DeserializeOwned>(
            job_type: JobType,
            input: &Value,
        ) -> Result<T, JobError> {
            T::deserialize(input).map_err(|e| invalid(format!("{job_type} input: {e}")))
        }

        let request = match job_type {
            JobType::Scrape => JobRequest::Scrape(parse(job_type, input)?),
            JobType::Map => JobRequest::Map(parse(job_type, input)?),
            JobType::Crawl => JobRequest::Crawl(parse(job_type, input)?),
            JobType::BatchScrape => JobRequest::BatchScrape(parse(job_type, input)?),
            JobType::Extract => JobRequest::Extract(parse(job_type, input)?),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            JobRequest::Scrape(r) => {
                require_http(&r.url)?;
                r.options.validate()
            }
            JobRequest::Map(r) => require_http(&r.url),
            JobRequest::Crawl(r) => {
                require_http(&r.url)?;
                r.scrape_options.validate()
            }
            JobRequest::BatchScrape(r) => {
                if r.urls.is_empty() {
                    return Err(invalid("urls must not be empty"));
                }
                r.options.validate()
            }
            JobRequest::Extract(r) => {
                if r.urls.is_empty() {
                    return Err(invalid("urls must not be empty"));
                }
                if r.schema.is_none() && r.prompt.is_none() {
                    return Err(invalid("extract requires a schema or a prompt"));
                }
                Ok(())
            }
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::Scrape(_) => JobType::Scrape,
            JobRequest::Map(_) => JobType::Map,
            JobRequest::Crawl(_) => JobType::Crawl,
            JobRequest::BatchScrape(_) => JobType::BatchScrape,
            JobRequest::Extract(_) => JobType::Extract,
        }
    }

    /// Primary URL recorded on the job row.
    pub fn url(&self) -> Option<&str> {
        match self {
            JobRequest::Scrape(r) => Some(&r.url),
            JobRequest::Map(r) => Some(&r.url),
            JobRequest::Crawl(r) => Some(&r.url),
            JobRequest::BatchScrape(r) => r.urls.first().map(String::as_str),
            JobRequest::Extract(r) => r.urls.first().map(String::as_str),
        }
    }

    pub fn to_input(&self) -> Result<Value, serde_json::Error> {
        match self {
            JobRequest::Scrape(r) => serde_json::to_value(r),
            JobRequest::Map(r) => serde_json::to_value(r),
            JobRequest::Crawl(r) => serde_json::to_value(r),
            JobRequest::BatchScrape(r) => serde_json::to_value(r),
            JobRequest::Extract(r) => serde_json::to_value(r),
        }
    }

    /// Budget for the whole executor run.
    ///
    /// Single-page work gets the configured job timeout. Multi-URL work
    /// uses the request's own timeout or scales the job timeout by the
    /// number of concurrency waves, capped at [`MAX_WORK_TIMEOUT`].
    pub fn work_timeout(&self, config: &WorkerConfig) -> Duration {
        let per_page = config.job_timeout;
        let cap = config.max_concurrent_urls_per_job;
        let explicit = |ms: Option<u64>| ms.map(|ms| Duration::from_millis(ms).min(MAX_WORK_TIMEOUT));

        match self {
            JobRequest::Scrape(_) | JobRequest::Map(_) => per_page,
            JobRequest::Crawl(r) => explicit(r.timeout).unwrap_or_else(|| {
                let pages = r.limit.unwrap_or(config.default_crawl_limit);
                // one extra wave for discovery
                scaled(per_page, pages, effective(r.max_concurrency, cap))
                    .saturating_add(per_page)
                    .min(MAX_WORK_TIMEOUT)
            }),
            JobRequest::BatchScrape(r) => scaled(
                r.options.page_timeout(per_page),
                r.urls.len(),
                effective(r.max_concurrency, cap),
            ),
            JobRequest::Extract(r) => explicit(r.timeout).unwrap_or_else(|| {
                scaled(per_page, r.urls.len(), effective(r.max_concurrency, cap))
            }),
        }
    }
}

fn effective(requested: Option<usize>, cap: usize) -> usize {
    requested.map_or(cap, |r| r.min(cap)).max(1)
}

fn scaled(per_page: Duration, urls: usize, concurrency: usize) -> Duration {
    let waves = urls.max(1).div_ceil(concurrency.max(1));
    let waves = u32::try_from(waves).unwrap_or(u32::MAX);
    per_page.saturating_mul(waves).min(MAX_WORK_TIMEOUT)
}
