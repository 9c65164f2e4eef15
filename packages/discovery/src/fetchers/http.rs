//! HTTP-based fetcher implementation.
//!
//! Fetches a page with a plain GET, follows a bounded number of
//! redirects and turns HTML into markdown plus link and metadata
//! extraction. JavaScript is never executed, so requests that need the
//! browser engine are refused.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::html;
use crate::traits::fetcher::{Engine, FetchRequest, FetchedPage, Fetcher, PageMetadata};

/// Default user agent sent when the request does not override it.
pub const DEFAULT_USER_AGENT: &str = "ScrapeEngine/1.0 (+https://github.com/scrape-engine)";

const MAX_REDIRECTS: usize = 10;

/// HTTP fetcher backed by `reqwest`.
///
/// # Example
///
/// ```rust,ignore
/// use discovery::{FetchRequest, Fetcher, HttpFetcher};
///
/// let fetcher = HttpFetcher::new()?;
/// let page = fetcher.fetch(&FetchRequest::new("https://example.com")).await?;
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    /// Create a fetcher with default settings.
    pub fn new() -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn get(&self, request: &FetchRequest) -> FetchResult<reqwest::Response> {
        let url = Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl {
            url: request.url.clone(),
        })?;

        let user_agent = request.user_agent.as_deref().unwrap_or(&self.user_agent);
        let mut builder = self
            .client
            .get(url)
            .timeout(request.timeout)
            .header(reqwest::header::USER_AGENT, user_agent);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %request.url, "HTTP fetch starting");
        builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }
    warn!(url = %url, error = %e, "HTTP request failed");
    FetchError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn is_html(content_type: Option<&str>, body: &str) -> bool {
    match content_type {
        Some(ct) => ct.contains("html"),
        None => {
            let head = body.trim_start().get(..256).unwrap_or(body).to_lowercase();
            head.starts_with("<!doctype html") || head.contains("<html")
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        if request.engine == Engine::Browser {
            return Err(FetchError::EngineUnavailable {
                engine: Engine::Browser.as_str().to_string(),
            });
        }

        let response = self.get(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        // Capture final URL after redirects
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_lowercase);

        let mut extra = HashMap::new();
        if let Some(ct) = &content_type {
            extra.insert("contentType".to_string(), ct.clone());
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: request.url.clone(),
                }
            } else {
                FetchError::Body {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let mut page = FetchedPage {
            url: final_url.to_string(),
            status_code: status.as_u16(),
            markdown: None,
            html: None,
            raw_html: Some(body.clone()),
            links: Vec::new(),
            screenshot: None,
            metadata: PageMetadata {
                source_url: request.url.clone(),
                status_code: status.as_u16(),
                extra,
                ..Default::default()
            },
            engine: Engine::Http.as_str().to_string(),
        };

        if is_html(content_type.as_deref(), &body) {
            let parsed = html::parse(&final_url, &body);
            page.markdown = Some(html::to_markdown(&parsed.main_html));
            page.html = Some(parsed.main_html);
            page.links = parsed.links;
            page.metadata.title = parsed.title;
            page.metadata.description = parsed.description;
            page.metadata.language = parsed.language;
        } else {
            page.markdown = Some(body);
        }

        debug!(
            url = %page.url,
            links = page.links.len(),
            "HTTP fetch complete"
        );
        Ok(page)
    }

    async fn fetch_text(&self, request: &FetchRequest) -> FetchResult<Option<String>> {
        let response = self.get(request).await?;
        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map(Some).map_err(|e| FetchError::Body {
            url: request.url.clone(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
