//! Sitemap parsing.
//!
//! Handles `<urlset>` documents, `<sitemapindex>` documents pointing at
//! further sitemaps, and plain-text sitemaps (one URL per line).

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::SitemapError;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sitemap {
    /// Page URLs
    UrlSet(Vec<String>),
    /// URLs of nested sitemaps
    Index(Vec<String>),
}

impl Sitemap {
    pub fn len(&self) -> usize {
        match self {
            Sitemap::UrlSet(urls) | Sitemap::Index(urls) => urls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse a sitemap body.
pub fn parse_sitemap(body: &str) -> Result<Sitemap, SitemapError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Sitemap::UrlSet(Vec::new()));
    }
    if !trimmed.starts_with('<') {
        return Ok(Sitemap::UrlSet(parse_text(trimmed)));
    }

    let mut reader = Reader::from_str(trimmed);
    reader.config_mut().trim_text(true);

    let mut is_index: Option<bool> = None;
    let mut in_loc = false;
    let mut current = String::new();
    let mut locs = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" if is_index.is_none() => is_index = Some(true),
                b"urlset" if is_index.is_none() => is_index = Some(false),
                b"loc" => {
                    in_loc = true;
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(text)) if in_loc => {
                let value = text
                    .unescape()
                    .map_err(|e| SitemapError::Malformed(e.to_string()))?;
                current.push_str(&value);
            }
            Ok(Event::CData(data)) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => {
                in_loc = false;
                let loc = current.trim();
                if !loc.is_empty() {
                    locs.push(loc.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SitemapError::Malformed(e.to_string())),
            _ => {}
        }
    }

    match is_index {
        Some(true) => Ok(Sitemap::Index(locs)),
        Some(false) => Ok(Sitemap::UrlSet(locs)),
        None => Err(SitemapError::UnknownRoot),
    }
}

fn parse_text(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(String::from)
        .collect()
}
