// src/crawl/filter.rs
// =============================================================================
// Admission filters: decide whether a fetched page goes on to dispatch.
//
// The checks always run in this order:
//   1. content type  - only text/html pages are audited
//   2. include       - if a pattern is set, the URL must match it
//   3. exclude       - if a pattern is set, the URL must NOT match it
//   4. budget        - consumes one unit of the crawl-wide URL budget
//
// The first three are pure. The budget check has a side effect: every page
// that reaches it consumes a unit, including the first one that overshoots
// (which is rejected and tells the controller to stop fetching).
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use regex::Regex;

use super::config::CrawlConfig;
use super::url::NormalizedUrl;
use crate::error::CrawlError;

/// The crawl-wide URL budget.
///
/// Shared by every admission decision. The decrement and the check are a
/// single atomic operation, so concurrent admissions can never let more
/// than the configured number of URLs through.
#[derive(Debug)]
pub struct RemainingBudget {
    remaining: AtomicI64,
}

impl RemainingBudget {
    pub fn new(maximum_urls: usize) -> Self {
        let start = i64::try_from(maximum_urls).unwrap_or(i64::MAX);
        Self {
            remaining: AtomicI64::new(start),
        }
    }

    /// Takes one unit. Returns false when the budget was already spent.
    pub fn try_consume(&self) -> bool {
        let before = self.remaining.fetch_sub(1, Ordering::SeqCst);
        before - 1 >= 0
    }

    /// Units left, never below zero
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst).max(0) as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) <= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotHtml,
    NotIncluded,
    Excluded,
    BudgetExhausted,
}

impl Rejection {
    /// Suffix used in the crawl log line
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotHtml => "skipped, not text/html",
            Rejection::NotIncluded => "filtered",
            Rejection::Excluded => "excluded",
            Rejection::BudgetExhausted => "ignored, maximum URLs reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(Rejection),
}

pub struct AdmissionFilters {
    include: Option<Regex>,
    exclude: Option<Regex>,
    budget: Arc<RemainingBudget>,
}

impl AdmissionFilters {
    pub fn new(include: Option<Regex>, exclude: Option<Regex>, budget: Arc<RemainingBudget>) -> Self {
        Self {
            include,
            exclude,
            budget,
        }
    }

    /// Wires the filters from a config, compiling its patterns
    pub fn from_config(config: &CrawlConfig, budget: Arc<RemainingBudget>) -> Result<Self, CrawlError> {
        Ok(Self::new(
            config.include_pattern()?,
            config.exclude_pattern()?,
            budget,
        ))
    }

    pub fn budget(&self) -> &Arc<RemainingBudget> {
        &self.budget
    }

    pub fn evaluate(&self, url: &NormalizedUrl, content_type: Option<&str>) -> Admission {
        if !is_html(content_type) {
            return Admission::Rejected(Rejection::NotHtml);
        }

        if let Some(include) = &self.include {
            if !matches_url(include, url) {
                return Admission::Rejected(Rejection::NotIncluded);
            }
        }

        if let Some(exclude) = &self.exclude {
            if matches_url(exclude, url) {
                return Admission::Rejected(Rejection::Excluded);
            }
        }

        if !self.budget.try_consume() {
            return Admission::Rejected(Rejection::BudgetExhausted);
        }

        Admission::Accepted
    }
}

// Case-insensitive "text/html" prefix; a missing content type is not HTML
pub(crate) fn is_html(content_type: Option<&str>) -> bool {
    const HTML: &str = "text/html";

    content_type
        .map(str::trim_start)
        .and_then(|ct| ct.get(..HTML.len()))
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(HTML))
}

// A pattern matches if it matches either the full URL or its path, so both
// "^https://example.com/docs" and "^/docs" work as expected
fn matches_url(pattern: &Regex, url: &NormalizedUrl) -> bool {
    pattern.is_match(&url.to_string()) || pattern.is_match(&url.path)
}
