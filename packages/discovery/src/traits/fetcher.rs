//! Fetcher trait for pluggable page acquisition.
//!
//! A `Fetcher` turns one URL into one normalized page. Whether that
//! happens over plain HTTP or through a headless browser is the
//! implementation's concern; callers only express a preference via
//! [`Engine`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use discovery::{FetchRequest, Fetcher};
//!
//! let page = fetcher
//!     .fetch(&FetchRequest::new("https://example.com").with_timeout(timeout))
//!     .await?;
//! println!("{} links on {}", page.links.len(), page.url);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{FetchError, FetchResult};

/// Default per-request timeout when the caller does not specify one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine preference for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Let the fetcher decide
    #[default]
    Auto,
    /// Plain HTTP request, no JavaScript
    Http,
    /// Headless browser rendering
    Browser,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Auto => "auto",
            Engine::Http => "http",
            Engine::Browser => "browser",
        }
    }
}

/// A single fetch request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Absolute URL to fetch
    pub url: String,

    /// Extra request headers
    pub headers: HashMap<String, String>,

    /// Timeout for this request
    pub timeout: Duration,

    /// User agent override
    pub user_agent: Option<String>,

    /// Engine preference
    pub engine: Engine,

    /// Capture a screenshot (requires a browser engine)
    pub screenshot: bool,
}

impl FetchRequest {
    /// Create a request with default timeout and automatic engine selection.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: None,
            engine: Engine::Auto,
            screenshot: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Request a screenshot; this forces the browser engine.
    pub fn with_screenshot(mut self) -> Self {
        self.screenshot = true;
        self.engine = Engine::Browser;
        self
    }
}

/// Metadata captured alongside a fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    /// URL that was requested (before redirects)
    pub source_url: String,
    pub status_code: u16,
    /// Any other source-specific values (headers, og tags, ...)
    #[serde(default, flatten)]
    pub extra: HashMap<String, String>,
}

/// Output of a successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub status_code: u16,
    pub markdown: Option<String>,
    /// Cleaned HTML (boilerplate removed)
    pub html: Option<String>,
    /// Body exactly as received
    pub raw_html: Option<String>,
    /// Absolute links found on the page, in document order
    #[serde(default)]
    pub links: Vec<String>,
    /// Base64 screenshot, only when requested from a browser engine
    pub screenshot: Option<String>,
    pub metadata: PageMetadata,
    /// Engine that actually served the request
    pub engine: String,
}

impl FetchedPage {
    /// Create a page with markdown content and no links.
    pub fn new(url: impl Into<String>, markdown: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            metadata: PageMetadata {
                source_url: url.clone(),
                status_code: 200,
                ..Default::default()
            },
            url,
            status_code: 200,
            markdown: Some(markdown.into()),
            html: None,
            raw_html: None,
            links: Vec::new(),
            screenshot: None,
            engine: Engine::Http.as_str().to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn with_links(mut self, links: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_raw_html(mut self, html: impl Into<String>) -> Self {
        self.raw_html = Some(html.into());
        self
    }

    /// Text the LLM should read: markdown if present, otherwise raw HTML.
    pub fn content(&self) -> &str {
        self.markdown
            .as_deref()
            .or(self.html.as_deref())
            .or(self.raw_html.as_deref())
            .unwrap_or("")
    }
}

/// Fetcher trait for pluggable page acquisition.
///
/// Implementations:
/// - `HttpFetcher` - plain HTTP with HTML parsing
/// - `MockFetcher` - canned pages for tests
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and normalize one page.
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage>;

    /// Fetch a raw text resource (robots.txt, sitemap XML).
    ///
    /// Returns `Ok(None)` when the resource does not exist (404/410),
    /// so callers can tell "absent" from "unreachable".
    async fn fetch_text(&self, request: &FetchRequest) -> FetchResult<Option<String>> {
        match self.fetch(request).await {
            Ok(page) => Ok(page.raw_html.or(page.markdown)),
            Err(FetchError::Status { status: 404 | 410, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the fetcher name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_forces_browser() {
        let request = FetchRequest::new("https://example.com").with_screenshot();
        assert!(request.screenshot);
        assert_eq!(request.engine, Engine::Browser);
    }

    #[test]
    fn test_page_content_prefers_markdown() {
        let page = FetchedPage::new("https://example.com", "# Hello").with_raw_html("<h1>Hello</h1>");
        assert_eq!(page.content(), "# Hello");

        let mut html_only = page.clone();
        html_only.markdown = None;
        assert_eq!(html_only.content(), "<h1>Hello</h1>");
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let page = FetchedPage::new("https://example.com", "body").with_title("Example");
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["metadata"]["title"], "Example");
        assert_eq!(json["metadata"]["sourceUrl"], "https://example.com");
    }
}
