// src/crawl/bucket.rs
// =============================================================================
// Maps a URL to the bucket (lane) it is dispatched in.
//
// A bucket is the first segment of the URL path:
//   /blog/post-1   -> "blog"
//   /docs/a/b/c    -> "docs"
//   /              -> "__root__"
//
// Pages in the same bucket are handed to the page auditor one at a time;
// different buckets run in parallel (see dispatch.rs).
// =============================================================================

use std::fmt;

use super::url::NormalizedUrl;

/// Key used for URLs with no path segment at all
pub const ROOT_BUCKET: &str = "__root__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    /// Routes a normalized URL to its bucket
    pub fn for_url(url: &NormalizedUrl) -> Self {
        Self::for_path(url.pathname())
    }

    /// Routes a raw path (query string and fragment are ignored)
    pub fn for_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();

        match path.split('/').find(|segment| !segment.is_empty()) {
            Some(segment) => BucketKey(segment.to_string()),
            None => Self::root(),
        }
    }

    pub fn root() -> Self {
        BucketKey(ROOT_BUCKET.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
