// src/crawl/mod.rs
// =============================================================================
// This module handles website crawling and page dispatch.
//
// Pipeline:
//   seed URL -> engine (fetch + follow links) -> filters (admit or reject)
//            -> bucket (first path segment) -> dispatcher (one page at a time
//               per bucket) -> page sink (audit, then complete())
//
// Submodules:
// - url: URL normalization
// - links: link extraction from HTML
// - config: crawl configuration and pattern compilation
// - filter: admission filters and the URL budget
// - bucket: URL -> bucket key routing
// - dispatch: per-bucket dispatch queues and the PageSink contract
// - engine: the fetch engine (trait + reqwest implementation)
// - controller: start/stop lifecycle tying everything together
// =============================================================================

mod bucket;
mod config;
mod controller;
mod dispatch;
mod engine;
mod filter;
mod links;
#[cfg(test)]
pub(crate) mod testing;
mod url;

pub use bucket::{BucketKey, ROOT_BUCKET};
pub use config::CrawlConfig;
pub use controller::{CrawlController, CrawlState, CrawlSummary};
pub use dispatch::{Completion, Dispatcher, PageSink, PendingItem};
pub use engine::{EngineConfig, FetchEngine, FetchEvent, FetchOptions, HttpFetchEngine, QueueItem};
pub use filter::{Admission, AdmissionFilters, Rejection, RemainingBudget};
pub use links::extract_links;
pub use self::url::NormalizedUrl;
