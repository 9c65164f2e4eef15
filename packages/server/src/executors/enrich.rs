//! LLM enrichment of fetched pages: summary, json and branding.
//!
//! Each requested format is one independent LLM call. Scrape treats any
//! failure as fatal; crawl and batch-scrape drop the failed field and keep
//! the page.

use discovery::{FieldKind, FieldRequest, FieldResponse, FieldSpec, LlmClient};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorCode, JobError};
use crate::kernel::jobs::{Format, ScrapeOptions};

const SUMMARY_PROMPT: &str = "Summarize the page for someone deciding whether to read it.";
const BRANDING_PROMPT: &str =
    "Describe the visual identity of the site: colors, typography, logo and tone of voice.";

/// Enriched fields for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub summary: Option<String>,
    pub json: Option<Value>,
    pub branding: Option<Value>,
}

/// Per-format results of an enrichment pass.
#[derive(Debug, Default)]
pub struct EnrichOutcome {
    pub enrichment: Enrichment,
    pub failures: Vec<(Format, String)>,
}

impl EnrichOutcome {
    /// Fail on the first enrichment that did not succeed.
    pub fn into_strict(self) -> Result<Enrichment, JobError> {
        match self.failures.into_iter().next() {
            Some((format, reason)) => Err(JobError::new(
                ErrorCode::EnrichmentFailed,
                format!("{} enrichment failed: {reason}", format_name(&format)),
            )),
            None => Ok(self.enrichment),
        }
    }

    /// Keep what succeeded; describe what did not.
    pub fn into_lenient(self) -> (Enrichment, Option<String>) {
        let warning = (!self.failures.is_empty()).then(|| {
            self.failures
                .iter()
                .map(|(format, reason)| format!("{} enrichment failed: {reason}", format_name(format)))
                .collect::<Vec<_>>()
                .join("; ")
        });
        (self.enrichment, warning)
    }
}

fn format_name(format: &Format) -> &'static str {
    match format {
        Format::Summary => "summary",
        Format::Json => "json",
        Format::Branding => "branding",
        _ => "format",
    }
}

/// Field specs for a caller-supplied schema. Without a schema the model
/// fills a single free-form `data` object.
pub fn schema_fields(schema: Option<&Value>) -> Vec<FieldSpec> {
    match schema {
        Some(schema) => FieldSpec::from_json_schema(schema),
        None => FieldSpec::from_json_schema(&json!({"type": "object"})),
    }
}

/// Unwrap the synthetic `data` field; otherwise the fields as an object.
pub fn collapse(fields: &[FieldSpec], response: FieldResponse) -> Value {
    if let [only] = fields {
        if only.name == "data" {
            let mut map = response.fields;
            return map.remove("data").unwrap_or(Value::Null);
        }
    }
    response.into_value()
}

fn summary_fields() -> Vec<FieldSpec> {
    vec![FieldSpec::string(
        "summary",
        "A concise summary of the page content in two to four sentences",
    )]
}

fn branding_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::string("colorScheme", "Either light or dark").optional(),
        FieldSpec::string("colors", "Primary, secondary and accent colors as hex codes")
            .with_kind(FieldKind::Object),
        FieldSpec::string("fonts", "Font families used for headings and body text")
            .with_kind(FieldKind::Array)
            .optional(),
        FieldSpec::string("logo", "Absolute URL of the site logo").optional(),
        FieldSpec::string("tone", "Tone of voice of the copy").optional(),
    ]
}

/// Race an LLM call against the caller's cancellation.
pub(crate) async fn call_llm(
    llm: &dyn LlmClient,
    request: &FieldRequest,
    cancel: &CancellationToken,
) -> Result<FieldResponse, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("cancelled".to_string()),
        result = llm.extract_fields(request) => result.map_err(|e| e.to_string()),
    }
}

/// Run every LLM format the options request.
pub async fn enrich(
    llm: &dyn LlmClient,
    url: &str,
    content: &str,
    options: &ScrapeOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> EnrichOutcome {
    let mut outcome = EnrichOutcome::default();

    for format in [Format::Summary, Format::Json, Format::Branding] {
        if !options.wants(format) {
            continue;
        }

        let (fields, prompt) = match format {
            Format::Summary => (summary_fields(), Some(SUMMARY_PROMPT.to_string())),
            Format::Branding => (branding_fields(), Some(BRANDING_PROMPT.to_string())),
            _ => {
                let json_options = options.json_options.clone().unwrap_or_default();
                (schema_fields(json_options.schema.as_ref()), json_options.prompt)
            }
        };

        let mut request = FieldRequest::new(url, content, fields.clone()).with_timeout(timeout);
        if let Some(prompt) = prompt {
            request = request.with_prompt(prompt);
        }

        let response = match call_llm(llm, &request, cancel).await {
            Ok(response) if response.is_empty() => {
                outcome
                    .failures
                    .push((format, "model returned no usable fields".to_string()));
                continue;
            }
            Ok(response) => response,
            Err(reason) => {
                debug!(url = %url, format = format_name(&format), error = %reason, "Enrichment call failed");
                outcome.failures.push((format, reason));
                continue;
            }
        };

        match format {
            Format::Summary => match response.get_str("summary") {
                Some(summary) if !summary.trim().is_empty() => {
                    outcome.enrichment.summary = Some(summary.to_string());
                }
                _ => outcome
                    .failures
                    .push((format, "model returned no summary text".to_string())),
            },
            Format::Branding => outcome.enrichment.branding = Some(response.into_value()),
            _ => outcome.enrichment.json = Some(collapse(&fields, response)),
        }
    }

    outcome
}
