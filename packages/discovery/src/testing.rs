//! Testing utilities including mock implementations.
//!
//! These are useful for testing discovery and job execution without
//! making real network or LLM calls.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::error::{FetchError, FetchResult, LlmError, LlmResult};
use crate::html;
use crate::traits::fetcher::{Engine, FetchRequest, FetchedPage, Fetcher};
use crate::traits::llm::{FieldKind, FieldRequest, FieldResponse, LlmClient};
use crate::urls;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn key(url: &str) -> String {
    urls::normalize_str(url, false).unwrap_or_else(|| url.to_string())
}

/// A mock fetcher serving canned pages.
///
/// Unknown URLs answer 404. Tracks every call and the peak number of
/// concurrent fetches, so tests can assert concurrency ceilings.
#[derive(Default, Clone)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, FetchedPage>>>,
    texts: Arc<RwLock<HashMap<String, String>>>,
    failures: Arc<RwLock<HashMap<String, FetchError>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    default_delay: Option<Duration>,
    browser: bool,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<RwLock<Vec<MockFetchCall>>>,
}

/// Record of a call made to the mock fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFetchCall {
    Fetch { url: String, engine: Engine },
    Text { url: String },
}

impl MockFetcher {
    /// Create a mock that supports every engine.
    pub fn new() -> Self {
        Self {
            browser: true,
            ..Default::default()
        }
    }

    /// Refuse browser requests, like a plain HTTP fetcher.
    pub fn without_browser(mut self) -> Self {
        self.browser = false;
        self
    }

    /// Add a canned page, keyed by its URL.
    pub fn with_page(self, page: FetchedPage) -> Self {
        write(&self.pages).insert(key(&page.url), page);
        self
    }

    /// Add a page built from HTML (links, title and markdown extracted).
    pub fn with_html(self, url: &str, body: &str) -> Self {
        let Some(base) = urls::parse_http(url) else {
            return self;
        };
        let parsed = html::parse(&base, body);
        let mut page = FetchedPage::new(url, html::to_markdown(&parsed.main_html))
            .with_links(parsed.links)
            .with_raw_html(body);
        page.html = Some(parsed.main_html);
        page.metadata.title = parsed.title;
        page.metadata.description = parsed.description;
        self.with_page(page)
    }

    /// Add a page with the given links and no content to speak of.
    pub fn with_links(self, url: &str, links: &[&str]) -> Self {
        self.with_page(FetchedPage::new(url, format!("Content of {}", url)).with_links(links.iter().copied()))
    }

    /// Add a raw text resource (robots.txt, sitemap).
    pub fn with_text(self, url: &str, body: impl Into<String>) -> Self {
        write(&self.texts).insert(key(url), body.into());
        self
    }

    /// Make a URL fail with the given error (page and text fetches).
    pub fn with_failure(self, url: &str, error: FetchError) -> Self {
        write(&self.failures).insert(key(url), error);
        self
    }

    /// Delay every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Delay fetches of one URL.
    pub fn with_url_delay(self, url: &str, delay: Duration) -> Self {
        write(&self.delays).insert(key(url), delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockFetchCall> {
        read(&self.calls).clone()
    }

    /// URLs passed to `fetch`, in call order.
    pub fn fetched_urls(&self) -> Vec<String> {
        read(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MockFetchCall::Fetch { url, .. } => Some(url.clone()),
                MockFetchCall::Text { .. } => None,
            })
            .collect()
    }

    /// Highest number of concurrent fetches observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn pause(&self, url: &str) {
        let delay = read(&self.delays).get(&key(url)).copied().or(self.default_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        write(&self.calls).push(MockFetchCall::Fetch {
            url: request.url.clone(),
            engine: request.engine,
        });

        if request.engine == Engine::Browser && !self.browser {
            return Err(FetchError::EngineUnavailable {
                engine: Engine::Browser.as_str().to_string(),
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.pause(&request.url).await;

        let k = key(&request.url);
        if let Some(error) = read(&self.failures).get(&k) {
            return Err(error.clone());
        }
        let page = read(&self.pages).get(&k).cloned();
        match page {
            Some(mut page) => {
                if request.engine == Engine::Browser {
                    page.engine = Engine::Browser.as_str().to_string();
                    if request.screenshot {
                        page.screenshot = Some("iVBORw0KGgo=".to_string());
                    }
                }
                Ok(page)
            }
            None => Err(FetchError::Status {
                url: request.url.clone(),
                status: 404,
            }),
        }
    }

    async fn fetch_text(&self, request: &FetchRequest) -> FetchResult<Option<String>> {
        write(&self.calls).push(MockFetchCall::Text {
            url: request.url.clone(),
        });
        self.pause(&request.url).await;

        let k = key(&request.url);
        if let Some(error) = read(&self.failures).get(&k) {
            return Err(error.clone());
        }
        if let Some(text) = read(&self.texts).get(&k) {
            return Ok(Some(text.clone()));
        }
        Ok(read(&self.pages)
            .get(&k)
            .and_then(|p| p.raw_html.clone().or_else(|| p.markdown.clone())))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock LLM client for testing.
///
/// Answers every request deterministically: canned fields per URL when
/// configured, otherwise a synthetic value per requested field.
#[derive(Default, Clone)]
pub struct MockLlm {
    responses: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
    failures: Arc<RwLock<HashMap<String, String>>>,
    fail_all: Option<String>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
}

/// Record of a call made to the mock LLM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLlmCall {
    pub url: String,
    pub fields: Vec<String>,
    pub prompt: Option<String>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned fields for a URL.
    pub fn with_response(self, url: &str, fields: Value) -> Self {
        if let Value::Object(map) = fields {
            write(&self.responses).insert(key(url), map);
        }
        self
    }

    /// Return only nulls for a URL.
    pub fn with_empty(self, url: &str) -> Self {
        write(&self.responses).insert(key(url), Map::new());
        self
    }

    /// Fail calls for a URL.
    pub fn with_failure(self, url: &str, message: impl Into<String>) -> Self {
        write(&self.failures).insert(key(url), message.into());
        self
    }

    /// Fail every call.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_all = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        read(&self.calls).clone()
    }

    fn synthetic(request: &FieldRequest) -> Map<String, Value> {
        request
            .fields
            .iter()
            .map(|field| {
                let value = match field.kind {
                    FieldKind::String => json!(format!("{} for {}", field.name, request.url)),
                    FieldKind::Number => json!(1),
                    FieldKind::Boolean => json!(true),
                    FieldKind::Array => json!([format!("{} item", field.name)]),
                    FieldKind::Object => json!({ "source": request.url }),
                };
                (field.name.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn extract_fields(&self, request: &FieldRequest) -> LlmResult<FieldResponse> {
        write(&self.calls).push(MockLlmCall {
            url: request.url.clone(),
            fields: request.fields.iter().map(|f| f.name.clone()).collect(),
            prompt: request.prompt.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_all {
            return Err(LlmError::Request(message.clone()));
        }

        let k = key(&request.url);
        if let Some(message) = read(&self.failures).get(&k) {
            return Err(LlmError::Request(message.clone()));
        }

        let canned = read(&self.responses).get(&k).cloned();
        let fields = match canned {
            Some(map) => request
                .fields
                .iter()
                .map(|f| (f.name.clone(), map.get(&f.name).cloned().unwrap_or(Value::Null)))
                .collect(),
            None => Self::synthetic(request),
        };
        Ok(FieldResponse::new(fields))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
