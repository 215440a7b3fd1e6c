// src/checker/http.rs
// =============================================================================
// Checks whether links are alive.
//
// Key functionality:
// - HEAD request first (no body download)
// - GET retry when the server refuses HEAD (405 / 501)
// - Classifies the outcome: ok, redirect, broken, timeout, TLS, DNS, error
// - Checks many links at once with a concurrency cap
//
// Two clients: links are checked without following redirects (a 3xx is
// reported as a Redirect), while whole pages are downloaded through a client
// that follows up to 5 redirects.
// =============================================================================

use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CrawlError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkStatus {
    /// 2xx
    Ok,
    /// 3xx, with the Location target
    Redirect { location: String },
    /// 404 / 410
    Broken,
    Timeout,
    SslError,
    DnsError,
    /// Anything else (5xx, connection reset, ...)
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheckResult {
    pub url: String,
    #[serde(flatten)]
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LinkCheckResult {
    /// Ok and redirects count as healthy
    pub fn is_ok(&self) -> bool {
        matches!(self.status, LinkStatus::Ok | LinkStatus::Redirect { .. })
    }
}

/// Reusable link checker; cloning shares the underlying connection pools
#[derive(Clone)]
pub struct LinkChecker {
    client: Client,
    pages: Client,
    concurrency: usize,
}

impl LinkChecker {
    pub fn new(tls_verify: bool, concurrency: usize) -> Result<Self, CrawlError> {
        Self::build(tls_verify, concurrency, true)
    }

    pub(crate) fn build(
        tls_verify: bool,
        concurrency: usize,
        use_system_proxy: bool,
    ) -> Result<Self, CrawlError> {
        let builder = || {
            let builder = Client::builder()
                .timeout(Duration::from_secs(10))
                .danger_accept_invalid_certs(!tls_verify);
            if use_system_proxy {
                builder
            } else {
                builder.no_proxy()
            }
        };

        // redirects are reported, not followed
        let client = builder().redirect(Policy::none()).build()?;
        let pages = builder().redirect(Policy::limited(5)).build()?;

        Ok(Self {
            client,
            pages,
            concurrency: concurrency.max(1),
        })
    }

    /// Uses `client` for both link checks and page downloads
    pub fn with_client(client: Client, concurrency: usize) -> Self {
        Self {
            pages: client.clone(),
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Client for link checks (redirects not followed)
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Client for downloading a page to audit (redirects followed)
    pub fn page_client(&self) -> &Client {
        &self.pages
    }

    /// Checks every URL, at most `concurrency` at a time.
    /// Results come back in completion order, not input order.
    pub async fn check_all(&self, urls: Vec<String>) -> Vec<LinkCheckResult> {
        stream::iter(urls)
            .map(|url| self.check(url))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    pub async fn check(&self, url: String) -> LinkCheckResult {
        let response = match self.client.head(&url).send().await {
            Ok(response)
                if matches!(
                    response.status(),
                    StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
                ) =>
            {
                debug!(url = %url, "HEAD refused, retrying with GET");
                self.client.get(&url).send().await
            }
            other => other,
        };

        match response {
            Ok(response) => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                classify_status(url, response.status(), location)
            }
            Err(e) => classify_error(url, &e),
        }
    }
}

fn classify_status(url: String, code: StatusCode, location: Option<String>) -> LinkCheckResult {
    let message = Some(format!("HTTP {}", code.as_u16()));

    let status = if code.is_success() {
        LinkStatus::Ok
    } else if code.is_redirection() {
        let location = location.unwrap_or_else(|| "unknown".to_string());
        return LinkCheckResult {
            url,
            message: Some(format!("HTTP {} -> {}", code.as_u16(), location)),
            status: LinkStatus::Redirect { location },
        };
    } else if matches!(code, StatusCode::NOT_FOUND | StatusCode::GONE) {
        LinkStatus::Broken
    } else {
        LinkStatus::Error
    };

    LinkCheckResult {
        url,
        status,
        message,
    }
}

fn classify_error(url: String, error: &reqwest::Error) -> LinkCheckResult {
    let text = error.to_string().to_lowercase();

    let (status, message) = if error.is_timeout() {
        (LinkStatus::Timeout, "Request timed out".to_string())
    } else if text.contains("certificate") || text.contains("ssl") || text.contains("tls") {
        (LinkStatus::SslError, "SSL certificate error".to_string())
    } else if error.is_connect() && text.contains("dns") {
        (LinkStatus::DnsError, "Could not resolve hostname".to_string())
    } else if error.is_connect() {
        (LinkStatus::Error, "Connection failed".to_string())
    } else {
        (LinkStatus::Error, error.to_string())
    };

    LinkCheckResult {
        url,
        status,
        message: Some(message),
    }
}
