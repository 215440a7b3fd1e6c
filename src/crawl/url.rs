// src/crawl/url.rs
// =============================================================================
// Canonicalizes raw URL strings into a structured form.
//
// Rules:
// - A URL without a scheme ("example.com/a") is treated as http
// - The scheme never carries its trailing "://" separators
// - A missing port defaults to 80 for http and 443 for everything else
// - A URL with no host is rejected with CrawlError::InvalidUrl
//
// The same NormalizedUrl is used for the seed handed to the fetch engine and
// as the input of the bucket router.
// =============================================================================

use std::fmt;

use url::Url;

use crate::error::CrawlError;

/// A parsed URL with every optional part filled in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Path plus query string, always starting with '/'
    pub path: String,
}

impl NormalizedUrl {
    /// Parses and canonicalizes `raw`
    pub fn parse(raw: &str) -> Result<Self, CrawlError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CrawlError::invalid_url(raw, "empty URL"));
        }

        let candidate = with_default_scheme(trimmed);
        let parsed = Url::parse(&candidate)
            .map_err(|e| CrawlError::invalid_url(raw, e.to_string()))?;

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(CrawlError::invalid_url(raw, "URL has no host")),
        };

        let protocol = parsed
            .scheme()
            .trim_end_matches(|c: char| c == ':' || c == '/')
            .to_string();

        // Url::port() hides ports that equal the scheme's default, which is
        // exactly the case the fallback below covers
        let port = parsed.port().unwrap_or_else(|| default_port(&protocol));

        let mut path = parsed.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            protocol,
            host,
            port,
            path,
        })
    }

    /// The path without its query string
    pub fn pathname(&self) -> &str {
        match self.path.find('?') {
            Some(pos) => &self.path[..pos],
            None => &self.path,
        }
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.host)?;
        if self.port != default_port(&self.protocol) {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.path)
    }
}

fn default_port(protocol: &str) -> u16 {
    if protocol == "http" {
        80
    } else {
        443
    }
}

// "example.com/a" and "//example.com/a" both become "http://example.com/a"
fn with_default_scheme(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("http://{}", rest)
    } else {
        format!("http://{}", raw)
    }
}
