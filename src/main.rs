// src/main.rs
// =============================================================================
// Entry point of the CLI.
//
// What happens here:
// 1. Parse command-line arguments and set up logging
// 2. Build the fetch engine, the link-audit sink and the crawl controller
// 3. Start the crawl; print each page report as soon as it arrives
// 4. Stop on Ctrl-C or when the crawl runs out of pages
// 5. Exit with 0 = all pages healthy, 1 = broken links found, 2 = error
// =============================================================================

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use a11y_crawler::checker::{LinkAuditSink, LinkCheckResult, LinkChecker, LinkStatus, PageReport};
use a11y_crawler::crawl::{CrawlController, CrawlSummary, EngineConfig, HttpFetchEngine};
use a11y_crawler::logging::init_logging;
use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = cli.crawl_config();

    let engine = Arc::new(HttpFetchEngine::new(EngineConfig::default())?);
    let checker = LinkChecker::new(!cli.http_tls_disable, 16)?;

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(LinkAuditSink::new(checker, cli.audit_concurrency, report_tx));

    let controller = Arc::new(CrawlController::new(engine));
    controller
        .start(config, sink)
        .with_context(|| format!("cannot start crawling {}", cli.url))?;

    let printer = tokio::spawn(print_reports(report_rx, cli.json));

    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping crawl");
                controller.stop();
            }
        })
    };

    let summary = controller.wait().await;

    // Dropping the last controller handle drops the sink, which closes the
    // report channel once the remaining audits have reported
    interrupt.abort();
    let _ = interrupt.await;
    drop(controller);

    let totals = printer.await.context("report printer failed")??;
    print_summary(&summary, &totals, cli.json)?;

    if totals.broken_links > 0 || totals.failed_pages > 0 {
        Ok(1)
    } else {
        Ok(0)
    }
}

#[derive(Debug, Default)]
struct Totals {
    pages: usize,
    failed_pages: usize,
    links: usize,
    broken_links: usize,
}

async fn print_reports(mut reports: mpsc::UnboundedReceiver<PageReport>, json: bool) -> Result<Totals> {
    let mut totals = Totals::default();

    while let Some(report) = reports.recv().await {
        totals.pages += 1;
        totals.links += report.links.len();
        totals.broken_links += report.broken_links().count();
        if report.error.is_some() {
            totals.failed_pages += 1;
        }

        if json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_table(&report);
        }
    }

    Ok(totals)
}

// Prints one page's links as a human-readable table
fn print_table(report: &PageReport) {
    println!("\n[{}] {}", report.bucket, report.url);

    if let Some(error) = &report.error {
        println!("   ⚠️  audit failed: {}", error);
        return;
    }
    if report.links.is_empty() {
        println!("   no links found");
        return;
    }

    println!("   {:<60} {:<15} {:<30}", "URL", "STATUS", "MESSAGE");
    println!("   {}", "=".repeat(105));
    for link in &report.links {
        println!(
            "   {:<60} {:<15} {:<30}",
            truncate(&link.url, 57),
            format_status(link),
            link.message.as_deref().unwrap_or("")
        );
    }
}

fn print_summary(summary: &CrawlSummary, totals: &Totals, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "summary": summary,
            "pages_audited": totals.pages,
            "pages_failed": totals.failed_pages,
            "links_checked": totals.links,
            "links_broken": totals.broken_links,
        });
        println!("{}", line);
        return Ok(());
    }

    println!();
    println!("📊 Summary:");
    println!("   🌐 Pages fetched: {}", summary.discovered);
    println!("   📋 Pages audited: {} in {} bucket(s)", totals.pages, summary.buckets);
    println!("   ⏭️  Pages skipped: {}", summary.rejected);
    if summary.dropped > 0 {
        println!("   ✋ Pages dropped after stop: {}", summary.dropped);
    }
    println!("   🔀 Redirects followed: {}", summary.redirects);
    println!("   ⚠️  Fetch errors: {}", summary.fetch_errors);
    println!("   🔗 Links checked: {}", totals.links);
    println!("   ❌ Broken links: {}", totals.broken_links);
    Ok(())
}

fn truncate(url: &str, max: usize) -> String {
    if url.chars().count() > max {
        let head: String = url.chars().take(max).collect();
        format!("{}...", head)
    } else {
        url.to_string()
    }
}

fn format_status(link: &LinkCheckResult) -> &'static str {
    match link.status {
        LinkStatus::Ok => "✅ OK",
        LinkStatus::Redirect { .. } => "🔀 REDIRECT",
        LinkStatus::Broken => "❌ BROKEN",
        LinkStatus::Timeout => "⏱️  TIMEOUT",
        LinkStatus::SslError => "🔒 SSL ERROR",
        LinkStatus::DnsError => "🌐 DNS ERROR",
        LinkStatus::Error => "⚠️  ERROR",
    }
}
