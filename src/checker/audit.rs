// src/checker/audit.rs
// =============================================================================
// The page sink used by the CLI: a broken-link audit of every dispatched page.
//
// For each page:
// 1. Wait for an audit slot (at most `concurrency` pages are audited at once)
// 2. Download the page and extract its links
// 3. Check every link
// 4. Send a PageReport to the report channel
// 5. Call complete() so the page's bucket can release its next page
//
// Step 5 always happens, even when the download fails: an audit error is
// part of the report, it never stalls the bucket.
// =============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use super::http::{LinkCheckResult, LinkChecker};
use crate::crawl::{extract_links, PageSink, PendingItem};

/// Outcome of auditing one page
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub url: String,
    pub bucket: String,
    /// Set when the page itself could not be audited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub links: Vec<LinkCheckResult>,
}

impl PageReport {
    pub fn broken_links(&self) -> impl Iterator<Item = &LinkCheckResult> {
        self.links.iter().filter(|link| !link.is_ok())
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.broken_links().next().is_none()
    }
}

pub struct LinkAuditSink {
    checker: LinkChecker,
    slots: Arc<Semaphore>,
    reports: mpsc::UnboundedSender<PageReport>,
}

impl LinkAuditSink {
    pub fn new(
        checker: LinkChecker,
        concurrency: usize,
        reports: mpsc::UnboundedSender<PageReport>,
    ) -> Self {
        Self {
            checker,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            reports,
        }
    }
}

impl PageSink for LinkAuditSink {
    fn accept(&self, item: PendingItem) {
        let checker = self.checker.clone();
        let slots = Arc::clone(&self.slots);
        let reports = self.reports.clone();

        tokio::spawn(async move {
            // the semaphore is never closed, so acquire only fails on shutdown
            let _slot = slots.acquire_owned().await;

            debug!(bucket = %item.bucket, url = %item.url, "auditing page");
            let report = match audit_page(&checker, &item.url).await {
                Ok(links) => PageReport {
                    url: item.url.clone(),
                    bucket: item.bucket.to_string(),
                    error: None,
                    links,
                },
                Err(e) => {
                    warn!(url = %item.url, error = %e, "page audit failed");
                    PageReport {
                        url: item.url.clone(),
                        bucket: item.bucket.to_string(),
                        error: Some(e.to_string()),
                        links: Vec::new(),
                    }
                }
            };

            let _ = reports.send(report);
            item.complete();
        });
    }
}

async fn audit_page(checker: &LinkChecker, url: &str) -> Result<Vec<LinkCheckResult>> {
    // the engine reports redirect targets on their own, but a page can
    // start redirecting between the crawl's fetch and this one
    let response = checker.page_client().get(url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("HTTP {}", response.status()));
    }

    let base = response.url().clone();
    let html = response.text().await?;
    let links: Vec<String> = extract_links(&html, &base)
        .into_iter()
        .map(String::from)
        .collect();

    Ok(checker.check_all(links).await)
}
