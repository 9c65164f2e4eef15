//! URL discovery and bounded fetching for the scrape engine.
//!
//! This crate holds everything below the job layer: the collaborator
//! contracts the executors call through, and the machinery that turns a
//! seed URL into a scoped, deduplicated list of links.
//!
//! # Usage
//!
//! ```rust,ignore
//! use discovery::{DiscoverOptions, Discovery, HttpFetcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let discovery = Discovery::new(Arc::new(HttpFetcher::new()?));
//! let opts = DiscoverOptions::new("https://example.com").with_limit(50);
//! let output = discovery.discover(&opts, &CancellationToken::new()).await?;
//!
//! for link in output.links {
//!     println!("{}", link.url);
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator contracts (`Fetcher`, `LlmClient`)
//! - [`discover`] - Discovery engine (robots, sitemaps, link crawl)
//! - [`pool`] - Bounded per-job fetch pool
//! - [`fetchers`] - HTTP fetcher
//! - [`llm`] - OpenAI-compatible LLM client
//! - [`testing`] - Mock implementations for testing

pub mod discover;
pub mod error;
pub mod fetchers;
pub mod html;
pub mod llm;
pub mod pool;
pub mod robots;
pub mod sitemap;
pub mod testing;
pub mod traits;
pub mod urls;

// Re-export core types at crate root
pub use discover::{DiscoverOptions, Discovery, DiscoveryLink, DiscoveryOutput, SitemapMode};
pub use error::{DiscoveryError, FetchError, LlmError, SitemapError};
pub use fetchers::HttpFetcher;
pub use llm::OpenAiClient;
pub use pool::{FetchPool, PoolReport};
pub use robots::RobotsTxt;
pub use traits::{
    fetcher::{Engine, FetchRequest, FetchedPage, Fetcher, PageMetadata},
    llm::{FieldKind, FieldRequest, FieldResponse, FieldSpec, LlmClient},
};
