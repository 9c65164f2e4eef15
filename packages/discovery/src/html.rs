//! HTML helpers shared by fetchers: metadata, anchors, markdown.

use scraper::{Html, Selector};
use url::Url;

/// Elements stripped before markdown conversion.
const BOILERPLATE: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "iframe", "svg",
];

/// Everything a fetcher needs from one HTML document.
#[derive(Debug, Clone, Default)]
pub struct ParsedHtml {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Absolute http(s) links in document order, fragments removed
    pub links: Vec<String>,
    /// Main content with boilerplate removed
    pub main_html: String,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a document fetched from `base`.
pub fn parse(base: &Url, html: &str) -> ParsedHtml {
    let document = Html::parse_document(html);

    // <base href> changes how relative links resolve
    let base = first_attr(&document, "base[href]", "href")
        .and_then(|href| base.join(&href).ok())
        .unwrap_or_else(|| base.clone());

    ParsedHtml {
        title: first_text(&document, "title")
            .or_else(|| first_attr(&document, r#"meta[property="og:title"]"#, "content")),
        description: first_attr(&document, r#"meta[name="description"]"#, "content")
            .or_else(|| first_attr(&document, r#"meta[property="og:description"]"#, "content")),
        language: first_attr(&document, "html[lang]", "lang"),
        links: extract_links(&document, &base),
        main_html: main_content(&document),
    }
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Some(anchors) = selector("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };

        // Skip anchors, javascript, mailto
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }

        if let Ok(mut resolved) = base.join(href) {
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            resolved.set_fragment(None);
            links.push(resolved.to_string());
        }
    }
    links
}

fn main_content(document: &Html) -> String {
    for css in ["main", "article", "[role='main']"] {
        if let Some(sel) = selector(css) {
            if let Some(main) = document.select(&sel).next() {
                return strip_boilerplate(&main.html());
            }
        }
    }

    match selector("body").and_then(|sel| document.select(&sel).next().map(|b| b.html())) {
        Some(body) => strip_boilerplate(&body),
        None => document.html(),
    }
}

fn strip_boilerplate(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();
    for css in BOILERPLATE {
        if let Some(sel) = selector(css) {
            for element in fragment.select(&sel) {
                result = result.replace(&element.html(), "");
            }
        }
    }
    result
}

/// Convert HTML to markdown, falling back to plain text.
pub fn to_markdown(html: &str) -> String {
    htmd::convert(html)
        .unwrap_or_else(|_| {
            Html::parse_fragment(html)
                .root_element()
                .text()
                .collect::<String>()
        })
        .trim()
        .to_string()
}
