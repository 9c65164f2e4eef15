//! Typed errors for the discovery library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that can occur while fetching a single URL.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Upstream answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection, TLS or protocol failure
    #[error("request failed for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// Response body could not be read or decoded
    #[error("unreadable body for {url}: {reason}")]
    Body { url: String, reason: String },

    /// Per-request timeout elapsed
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The requested engine is not provided by this fetcher
    #[error("engine unavailable: {engine}")]
    EngineUnavailable { engine: String },

    /// Caller cancelled the fetch
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error reflects a timeout rather than a content failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Errors that abort a discovery run.
///
/// Degraded-but-usable runs (robots.txt unreachable, sitemap missing)
/// are reported through the result's warning instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Seed URL could not be parsed or is not http(s)
    #[error("invalid seed URL: {url}")]
    InvalidSeed { url: String },

    /// Seed page unreachable and no sitemap yielded any link
    #[error("seed unreachable: {url}: {source}")]
    SeedUnreachable {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Discovery was cancelled by the caller
    #[error("discovery cancelled")]
    Cancelled,
}

/// Errors returned by an LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure talking to the provider
    #[error("LLM request failed: {0}")]
    Request(String),

    /// Provider answered with an error status
    #[error("LLM provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response did not contain parseable structured output
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),

    /// Call exceeded its timeout
    #[error("LLM call timed out")]
    Timeout,

    /// Client misconfiguration (missing model, bad schema)
    #[error("LLM config error: {0}")]
    Config(String),
}

/// Errors parsing a sitemap document.
#[derive(Debug, Error)]
pub enum SitemapError {
    /// XML could not be read
    #[error("malformed sitemap: {0}")]
    Malformed(String),

    /// Document is neither a urlset nor a sitemapindex
    #[error("not a sitemap document")]
    UnknownRoot,
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Result type alias for LLM operations.
pub type LlmResult<T> = std::result::Result<T, LlmError>;
