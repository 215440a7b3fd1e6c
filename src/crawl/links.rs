// src/crawl/links.rs
// =============================================================================
// Extracts outgoing links from an HTML page.
//
// We use the `scraper` crate to find every <a href="..."> and the `url` crate
// to resolve relative hrefs against the page URL (like a browser does).
//
// The result:
// - only http/https links (mailto:, tel:, javascript:, data: are skipped)
// - fragments removed ("/about#team" and "/about" are the same page)
// - duplicates removed, first occurrence order kept
// =============================================================================

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

pub fn extract_links(html: &str, page_url: &Url) -> Vec<Url> {
    // "a[href]" is a constant, valid selector; parse can only fail on bad syntax
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        if let Some(link) = resolve_link(page_url, href) {
            if seen.insert(link.as_str().to_string()) {
                links.push(link);
            }
        }
    }

    links
}

/// Drops the "#fragment" part of a URL string
pub fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    // join() handles both absolute and relative hrefs
    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
