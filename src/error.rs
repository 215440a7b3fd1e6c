// src/error.rs
// =============================================================================
// Error types for the crawl core.
//
// Only a handful of things can actually fail here: a URL with no host, a
// regex that does not compile, a config that makes no sense, or starting a
// crawl twice. Everything that goes wrong *during* a crawl (HTTP errors,
// 404s, rejected URLs) is logged and skipped instead of being returned.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// The URL could not be parsed or has no host
    #[error("URL '{url}' is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// An include/exclude pattern failed to compile
    #[error("invalid URL pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a controller that already left the idle state
    #[error("crawl has already been started")]
    AlreadyStarted,

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl CrawlError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        CrawlError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
