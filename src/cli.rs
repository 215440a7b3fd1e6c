// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Example:
//   a11y-crawler https://example.com -d 2 -m 50 --filter-by-urls '^/docs'
// =============================================================================

use clap::Parser;

use a11y_crawler::crawl::CrawlConfig;

#[derive(Parser, Debug)]
#[command(
    name = "a11y-crawler",
    version,
    about = "Crawl a website and audit every HTML page, one page at a time per site section",
    long_about = "a11y-crawler crawls a website from a starting URL, groups the pages it finds by \
                  the first segment of their path, and audits the pages of each group one after \
                  the other while different groups are audited in parallel."
)]
pub struct Cli {
    /// Website URL to start from (the scheme defaults to http)
    pub url: String,

    /// Maximum crawl depth (0 = unlimited, 1 = only the starting page)
    #[arg(short = 'd', long, default_value_t = 3)]
    pub maximum_depth: usize,

    /// Maximum number of pages to audit
    #[arg(short = 'm', long, default_value_t = 128)]
    pub maximum_urls: usize,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub http_tls_disable: bool,

    /// Only audit URLs matching this regex (case-insensitive)
    #[arg(short = 'f', long, value_name = "REGEX")]
    pub filter_by_urls: Option<String>,

    /// Never audit URLs matching this regex (case-insensitive)
    #[arg(short = 'e', long, value_name = "REGEX")]
    pub exclude_by_urls: Option<String>,

    /// How many pages may be audited at the same time
    #[arg(long, default_value_t = 4)]
    pub audit_concurrency: usize,

    /// Output one JSON report per line instead of tables
    #[arg(long)]
    pub json: bool,

    /// Debug logging for the crawler
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            seed_url: self.url.clone(),
            maximum_depth: self.maximum_depth,
            maximum_urls: self.maximum_urls,
            http_tls_disable: self.http_tls_disable,
            filter_by_urls: self.filter_by_urls.clone(),
            exclude_by_urls: self.exclude_by_urls.clone(),
        }
    }
}
