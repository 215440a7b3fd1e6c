// src/logging.rs
// =============================================================================
// Logging setup using `tracing`.
//
// - Logs go to stderr, stdout is reserved for page reports (tables or JSON)
// - RUST_LOG always wins, e.g. RUST_LOG=a11y_crawler=trace
// - Without RUST_LOG: info everywhere, debug for this crate with --verbose
// =============================================================================

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Call once, at startup.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "info,a11y_crawler=debug"
    } else {
        "info"
    };
    // fall back to our default when RUST_LOG is unset or unparsable
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
