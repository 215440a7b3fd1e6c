// src/checker/mod.rs
// =============================================================================
// The default page sink: audits every dispatched page for broken links.
//
// Submodules:
// - http: checks whether a link is alive and classifies the result
// - audit: the PageSink implementation that downloads a page, checks its
//          links, reports, and completes the page
// =============================================================================

mod audit;
mod http;

pub use audit::{LinkAuditSink, PageReport};
pub use http::{LinkCheckResult, LinkChecker, LinkStatus};
