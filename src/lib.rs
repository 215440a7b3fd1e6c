// src/lib.rs
// =============================================================================
// a11y-crawler: crawl a website and hand every HTML page, one at a time per
// bucket (first path segment), to a page sink.
//
// - crawl: the crawl core (URL normalization, admission, buckets, dispatch,
//          fetch engine, lifecycle)
// - checker: the default page sink, a broken-link audit
// - error: typed errors of the crawl core
// - logging: tracing subscriber setup
// =============================================================================

pub mod checker;
pub mod crawl;
pub mod error;
pub mod logging;
