//! URL normalization and domain scoping.

use url::Url;

/// Extensions that are recorded as links but never traversed.
const ASSET_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".json",
    ".xml", ".zip", ".gz", ".mp3", ".mp4", ".avi", ".mov", ".woff", ".woff2", ".ttf",
];

/// Parse a link, accepting only http(s) URLs with a host.
pub fn parse_http(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed)
}

/// Normalized form of a URL used for deduplication.
///
/// Lowercases scheme and host (done by the parser), drops the fragment,
/// default port and trailing slash of non-root paths, and optionally the
/// query string.
pub fn normalize(url: &Url, ignore_query: bool) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if ignore_query || normalized.query() == Some("") {
        normalized.set_query(None);
    }

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }

    normalized.to_string()
}

/// A URL as it should be fetched: the original form minus its fragment.
pub fn without_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Normalize a raw string, returning `None` for non-http(s) input.
pub fn normalize_str(url: &str, ignore_query: bool) -> Option<String> {
    parse_http(url).map(|u| normalize(&u, ignore_query))
}

/// Whether a URL points at a non-HTML asset.
pub fn is_asset(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Origin of a URL as `scheme://host[:port]`.
pub fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Host scoping relative to a seed URL.
#[derive(Debug, Clone)]
pub struct Scope {
    seed_host: String,
    include_subdomains: bool,
    allow_external: bool,
}

impl Scope {
    pub fn new(seed: &Url, include_subdomains: bool, allow_external: bool) -> Self {
        Self {
            seed_host: seed.host_str().unwrap_or_default().to_lowercase(),
            include_subdomains,
            allow_external,
        }
    }

    pub fn seed_host(&self) -> &str {
        &self.seed_host
    }

    /// Whether a URL may be returned to the caller.
    pub fn contains(&self, url: &Url) -> bool {
        self.allow_external || self.is_site(url)
    }

    /// Whether a URL belongs to the seed site (host, or subdomain when enabled).
    ///
    /// Traversal follows only these links, even when external links may be
    /// recorded.
    pub fn is_site(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        if host == self.seed_host {
            return true;
        }
        if !self.include_subdomains {
            return false;
        }
        let base = strip_www(&self.seed_host);
        host == base || host.ends_with(&format!(".{}", base))
    }
}
