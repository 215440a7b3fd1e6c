// src/crawl/config.rs
// =============================================================================
// Crawl configuration.
//
// A CrawlConfig is built once (usually from the CLI), handed to
// CrawlController::start, and never changed afterwards. The include/exclude
// patterns are compiled here so a bad regex fails the start instead of
// silently letting everything through.
// =============================================================================

use regex::{Regex, RegexBuilder};

use super::engine::FetchOptions;
use crate::error::CrawlError;

pub const DEFAULT_MAXIMUM_DEPTH: usize = 3;
pub const DEFAULT_MAXIMUM_URLS: usize = 128;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// The URL the crawl starts from
    pub seed_url: String,
    /// How many link hops to follow (0 = unlimited, 1 = only the seed)
    pub maximum_depth: usize,
    /// Upper bound on pages admitted to dispatch for the whole crawl
    pub maximum_urls: usize,
    /// Accept invalid TLS certificates
    pub http_tls_disable: bool,
    /// Only URLs matching this pattern are admitted
    pub filter_by_urls: Option<String>,
    /// URLs matching this pattern are never admitted
    pub exclude_by_urls: Option<String>,
}

impl CrawlConfig {
    pub fn new(seed_url: impl Into<String>) -> Self {
        Self {
            seed_url: seed_url.into(),
            maximum_depth: DEFAULT_MAXIMUM_DEPTH,
            maximum_urls: DEFAULT_MAXIMUM_URLS,
            http_tls_disable: false,
            filter_by_urls: None,
            exclude_by_urls: None,
        }
    }

    pub fn with_maximum_depth(mut self, depth: usize) -> Self {
        self.maximum_depth = depth;
        self
    }

    pub fn with_maximum_urls(mut self, urls: usize) -> Self {
        self.maximum_urls = urls;
        self
    }

    pub fn with_tls_disabled(mut self, disabled: bool) -> Self {
        self.http_tls_disable = disabled;
        self
    }

    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter_by_urls = Some(pattern.into());
        self
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_by_urls = Some(pattern.into());
        self
    }

    /// The part of the config the fetch engine cares about
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_depth: self.maximum_depth,
            tls_verify: !self.http_tls_disable,
        }
    }

    pub(crate) fn include_pattern(&self) -> Result<Option<Regex>, CrawlError> {
        compile(self.filter_by_urls.as_deref())
    }

    pub(crate) fn exclude_pattern(&self) -> Result<Option<Regex>, CrawlError> {
        compile(self.exclude_by_urls.as_deref())
    }
}

// Patterns are matched case-insensitively
fn compile(pattern: Option<&str>) -> Result<Option<Regex>, CrawlError> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };

    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|source| CrawlError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}
