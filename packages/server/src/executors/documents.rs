//! Document shaping and the shared fetch-and-store loop of crawl and batch-scrape.

use discovery::{FetchPool, FetchedPage, PageMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::enrich::{self, Enrichment};
use super::scrape::fetch_page;
use super::JobContext;
use crate::kernel::jobs::{Format, NewDocument, ScrapeOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(flatten)]
    pub page: PageMetadata,
    /// Engine that served the page
    pub engine: String,
}

/// One page rendered into the requested formats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutput {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branding: Option<Value>,
    /// Enrichment that was requested but could not be produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl DocumentOutput {
    /// Keep only the formats the caller asked for.
    pub fn shape(page: FetchedPage, options: &ScrapeOptions) -> Self {
        let keep = |format: Format, value: Option<String>| value.filter(|_| options.wants(format));

        Self {
            markdown: keep(Format::Markdown, page.markdown),
            html: keep(Format::Html, page.html),
            raw_html: keep(Format::RawHtml, page.raw_html),
            links: options.wants(Format::Links).then_some(page.links),
            screenshot: keep(Format::Screenshot, page.screenshot),
            metadata: DocumentMetadata {
                page: page.metadata,
                engine: page.engine,
            },
            url: page.url,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, enrichment: Enrichment) {
        self.summary = enrichment.summary;
        self.json = enrichment.json;
        self.branding = enrichment.branding;
    }

    pub fn to_new_document(&self, job_id: uuid::Uuid) -> Result<NewDocument, serde_json::Error> {
        let links = self.links.as_ref().map(serde_json::to_value).transpose()?;

        Ok(NewDocument::builder()
            .job_id(job_id)
            .url(self.url.clone())
            .markdown(self.markdown.clone())
            .html(self.html.clone())
            .raw_html(self.raw_html.clone())
            .links(links)
            .metadata(serde_json::to_value(&self.metadata)?)
            .summary(self.summary.clone())
            .json(self.json.clone())
            .branding(self.branding.clone())
            .build())
    }
}

/// Output of crawl and batch-scrape jobs. Pages live in the documents table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBatchOutput {
    /// Documents persisted
    pub documents: usize,
    pub attempted: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Fetch every URL through the pool and persist each page that succeeds.
///
/// Per-URL failures are logged and counted, never propagated. Enrichment
/// failures drop the enriched field but keep the page.
pub(crate) async fn fetch_and_store(
    ctx: &JobContext,
    urls: Vec<String>,
    options: &ScrapeOptions,
    pool: FetchPool,
) -> PageBatchOutput {
    let llm = if options.needs_llm() {
        ctx.deps.llm().ok().cloned()
    } else {
        None
    };
    let llm = llm.as_ref();

    let report = pool
        .run(urls, &ctx.cancel, |url, cancel| async move {
            let page = match fetch_page(ctx, &url, options, &cancel).await {
                Ok(page) => page,
                Err(failure) => {
                    warn!(job_id = %ctx.job_id, url = %url, error = %failure.error, "Page fetch failed");
                    return false;
                }
            };

            let content = page.content().to_string();
            let mut document = DocumentOutput::shape(page, options);

            if let Some(llm) = llm {
                let outcome =
                    enrich::enrich(llm.as_ref(), &url, &content, options, ctx.deps.config.job_timeout, &cancel)
                        .await;
                let (enrichment, warning) = outcome.into_lenient();
                document.apply(enrichment);
                document.warning = warning;
            }

            let new = match document.to_new_document(ctx.job_id) {
                Ok(new) => new,
                Err(e) => {
                    warn!(job_id = %ctx.job_id, url = %url, error = %e, "Document not serializable");
                    return false;
                }
            };

            match ctx.deps.store.add_document(new).await {
                Ok(_) => {
                    debug!(job_id = %ctx.job_id, url = %url, "Document stored");
                    true
                }
                Err(e) => {
                    warn!(job_id = %ctx.job_id, url = %url, error = %e, "Failed to store document");
                    false
                }
            }
        })
        .await;

    PageBatchOutput {
        documents: report.succeeded,
        attempted: report.launched,
        failed: report.failed,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> FetchedPage {
        let mut page = FetchedPage::new("https://example.com/a", "# A")
            .with_title("A")
            .with_links(["https://example.com/b"])
            .with_raw_html("<h1>A</h1>");
        page.html = Some("<h1>A</h1>".into());
        page
    }

    #[test]
    fn test_shape_keeps_requested_formats_only() {
        let options = ScrapeOptions {
            formats: vec![Format::Html, Format::Links],
            ..Default::default()
        };
        let doc = DocumentOutput::shape(page(), &options);

        assert!(doc.markdown.is_none());
        assert!(doc.raw_html.is_none());
        assert_eq!(doc.html.as_deref(), Some("<h1>A</h1>"));
        assert_eq!(doc.links, Some(vec!["https://example.com/b".to_string()]));
        assert_eq!(doc.metadata.page.title.as_deref(), Some("A"));
    }

    #[test]
    fn test_output_wire_shape() {
        let doc = DocumentOutput::shape(page(), &ScrapeOptions::default());
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["markdown"], "# A");
        assert_eq!(value["metadata"]["title"], "A");
        assert_eq!(value["metadata"]["statusCode"], 200);
        assert!(value["metadata"].get("engine").is_some());
        assert!(value.get("rawHtml").is_none());
    }

    #[test]
    fn test_to_new_document_carries_metadata() {
        let doc = DocumentOutput::shape(page(), &ScrapeOptions::default());
        let job_id = uuid::Uuid::now_v7();
        let new = doc.to_new_document(job_id).unwrap();

        assert_eq!(new.job_id, job_id);
        assert_eq!(new.url, "https://example.com/a");
        assert_eq!(new.markdown.as_deref(), Some("# A"));
        assert_eq!(new.metadata["sourceUrl"], "https://example.com/a");
    }
}
