//! Extract: fetch each URL and pull schema-shaped JSON out of it with the LLM.
//!
//! By default the first failing URL fails the job. With `ignoreInvalidURLs`
//! failures are recorded per URL and the job only fails when none succeeded.

use discovery::{FetchPool, FieldRequest, FieldSpec, LlmClient};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::enrich::{call_llm, collapse, schema_fields};
use super::scrape::fetch_page;
use super::{to_output, JobContext};
use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::{ExtractRequest, ScrapeOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResult {
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// `"<CODE>: <message>"` for failed URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failed_by_code: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOutput {
    pub results: Vec<ExtractResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ExtractSource>>,
    pub summary: ExtractSummary,
}

/// What happened to one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlOutcome {
    pub url: String,
    pub status_code: Option<u16>,
    pub result: Result<Value, JobError>,
}

impl UrlOutcome {
    pub fn success(url: impl Into<String>, data: Value) -> Self {
        Self {
            url: url.into(),
            status_code: Some(200),
            result: Ok(data),
        }
    }

    pub fn failure(url: impl Into<String>, error: JobError) -> Self {
        Self {
            url: url.into(),
            status_code: None,
            result: Err(error),
        }
    }
}

/// Tally outcomes by success and failure code.
pub fn summarize_outcomes(outcomes: &[UrlOutcome]) -> ExtractSummary {
    let mut summary = ExtractSummary {
        total: outcomes.len(),
        ..Default::default()
    };

    for outcome in outcomes {
        match &outcome.result {
            Ok(_) => summary.success += 1,
            Err(e) => {
                summary.failed += 1;
                *summary
                    .failed_by_code
                    .entry(e.code.as_str().to_string())
                    .or_default() += 1;
            }
        }
    }
    summary
}

/// Assemble the job output from per-URL outcomes, in input order.
pub fn build_output(outcomes: &[UrlOutcome], show_sources: bool) -> ExtractOutput {
    let results = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(data) => ExtractResult {
                url: o.url.clone(),
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            Err(e) => ExtractResult {
                url: o.url.clone(),
                success: false,
                data: None,
                error: Some(e.to_stored()),
            },
        })
        .collect();

    let sources = show_sources.then(|| {
        outcomes
            .iter()
            .map(|o| ExtractSource {
                url: o.url.clone(),
                status_code: o.status_code,
                error: o.result.as_ref().err().map(JobError::to_stored),
            })
            .collect()
    });

    ExtractOutput {
        results,
        sources,
        summary: summarize_outcomes(outcomes),
    }
}

async fn extract_one(
    ctx: &JobContext,
    llm: &dyn LlmClient,
    fields: &[FieldSpec],
    prompt: Option<&str>,
    url: String,
) -> UrlOutcome {
    let options = ScrapeOptions::default();

    let page = match fetch_page(ctx, &url, &options, &ctx.cancel).await {
        Ok(page) => page,
        Err(failure) => {
            return UrlOutcome {
                url,
                status_code: failure.status_code,
                result: Err(failure.error),
            }
        }
    };
    let status_code = Some(page.status_code);

    let mut request = FieldRequest::new(&url, page.content(), fields.to_vec())
        .with_timeout(ctx.deps.config.job_timeout);
    if let Some(prompt) = prompt {
        request = request.with_prompt(prompt);
    }

    let result = match call_llm(llm, &request, &ctx.cancel).await {
        Ok(response) if response.is_empty() => Err(JobError::new(
            ErrorCode::ExtractEmptyResult,
            "model returned no usable fields",
        )),
        Ok(response) => Ok(collapse(fields, response)),
        Err(reason) => Err(JobError::new(ErrorCode::ExtractFailed, reason)),
    };

    UrlOutcome {
        url,
        status_code,
        result,
    }
}

pub async fn run(ctx: &JobContext, request: ExtractRequest) -> Result<Value, JobError> {
    let llm: Arc<dyn LlmClient> = ctx.deps.llm()?.clone();
    let fields = schema_fields(request.schema.as_ref());
    let concurrency = FetchPool::capped(
        request.max_concurrency,
        ctx.deps.config.max_concurrent_urls_per_job,
    )
    .concurrency();
    let prompt = request.prompt.as_deref();

    // ordered so that fail-fast stops at the first failure in input order
    let mut pending = stream::iter(request.urls.iter().cloned())
        .map(|url| extract_one(ctx, llm.as_ref(), &fields, prompt, url))
        .buffered(concurrency);

    let mut outcomes = Vec::with_capacity(request.urls.len());
    while let Some(outcome) = pending.next().await {
        if let Err(e) = &outcome.result {
            if !request.ignore_invalid_urls {
                warn!(job_id = %ctx.job_id, url = %outcome.url, error = %e, "Extract failed fast");
                return Err(e.clone());
            }
            warn!(job_id = %ctx.job_id, url = %outcome.url, error = %e, "Extract skipped URL");
        }
        outcomes.push(outcome);
    }
    ctx.check_cancelled()?;

    let output = build_output(&outcomes, request.show_sources);
    if output.summary.success == 0 {
        return Err(JobError::new(
            ErrorCode::ExtractEmptyResult,
            "no URLs produced extracted JSON",
        ));
    }

    info!(
        job_id = %ctx.job_id,
        total = output.summary.total,
        success = output.summary.success,
        failed = output.summary.failed,
        "Extract finished"
    );
    to_output(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fail(url: &str, code: ErrorCode) -> UrlOutcome {
        UrlOutcome::failure(url, JobError::new(code, "boom"))
    }

    #[test]
    fn test_summary_counts_by_code() {
        let outcomes = vec![
            UrlOutcome::success("https://a.com", json!({"x": 1})),
            fail("https://b.com", ErrorCode::ScrapeFailed),
            fail("https://c.com", ErrorCode::ScrapeFailed),
        ];

        let summary = summarize_outcomes(&outcomes);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_by_code.len(), 1);
        assert_eq!(summary.failed_by_code["SCRAPE_FAILED"], 2);
    }

    #[test]
    fn test_summary_is_order_independent() {
        let mut outcomes = vec![
            fail("https://a.com", ErrorCode::ExtractFailed),
            UrlOutcome::success("https://b.com", json!(1)),
            fail("https://c.com", ErrorCode::ExtractEmptyResult),
        ];
        let forward = summarize_outcomes(&outcomes);
        outcomes.reverse();
        assert_eq!(forward, summarize_outcomes(&outcomes));
    }

    #[test]
    fn test_summary_wire_shape() {
        let summary = summarize_outcomes(&[fail("https://a.com", ErrorCode::ScrapeFailed)]);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            value,
            json!({"total": 1, "success": 0, "failed": 1, "failedByCode": {"SCRAPE_FAILED": 1}})
        );
    }

    #[test]
    fn test_build_output_sources_only_when_requested() {
        let outcomes = vec![
            UrlOutcome::success("https://a.com", json!({"x": 1})),
            fail("https://b.com", ErrorCode::ScrapeFailed),
        ];

        let output = build_output(&outcomes, false);
        assert!(output.sources.is_none());
        assert_eq!(output.results.len(), 2);
        assert!(output.results[0].success);
        assert_eq!(output.results[1].error.as_deref(), Some("SCRAPE_FAILED: boom"));

        let output = build_output(&outcomes, true);
        let sources = output.sources.unwrap();
        assert_eq!(sources[0].status_code, Some(200));
        assert_eq!(sources[1].error.as_deref(), Some("SCRAPE_FAILED: boom"));
    }
}
