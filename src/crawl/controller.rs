// src/crawl/controller.rs
// =============================================================================
// Crawl lifecycle: wires the fetch engine, admission filters, bucket router
// and dispatch queues together.
//
//   Idle --start()--> Running --budget spent--> Stopping --stop()--> Stopped
//                        |                                  ^
//                        +-------------- stop() ------------+
//
// For every page the engine reports:
//   fetched OK -> admission filters -> bucket router -> dispatcher.submit
//   redirect   -> logged, the engine fetches the target itself
//   404/error  -> logged, nothing else
// Pages that finish fetching after stop() skip the filters and are dropped.
//
// When the URL budget runs out the engine is halted (no new fetches) but
// pages already queued in the buckets keep draining to the sink.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::bucket::BucketKey;
use super::config::CrawlConfig;
use super::dispatch::{Dispatcher, PageSink};
use super::engine::{FetchEngine, FetchEvent, QueueItem};
use super::filter::{Admission, AdmissionFilters, Rejection, RemainingBudget};
use super::url::NormalizedUrl;
use crate::error::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    /// Budget exhausted: no new fetches, buckets still draining
    Stopping,
    Stopped,
}

/// Counters collected over a whole crawl
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Pages the engine fetched successfully
    pub discovered: usize,
    /// Pages sent to dispatch
    pub admitted: usize,
    /// Pages dropped by the admission filters
    pub rejected: usize,
    /// Pages fetched after the crawl was stopped, never filtered
    pub dropped: usize,
    /// 3xx responses; their targets are fetched separately
    pub redirects: usize,
    /// 404s, non-2xx statuses and transport errors
    pub fetch_errors: usize,
    /// Distinct buckets created
    pub buckets: usize,
}

struct RunningCrawl {
    dispatcher: Arc<Dispatcher>,
    events: Option<JoinHandle<CrawlSummary>>,
}

pub struct CrawlController {
    engine: Arc<dyn FetchEngine>,
    state: Arc<Mutex<CrawlState>>,
    run: Mutex<Option<RunningCrawl>>,
    /// Set once the engine has closed its event channel
    engine_done: Arc<AtomicBool>,
}

impl CrawlController {
    pub fn new(engine: Arc<dyn FetchEngine>) -> Self {
        Self {
            engine,
            state: Arc::new(Mutex::new(CrawlState::Idle)),
            run: Mutex::new(None),
            engine_done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> CrawlState {
        *lock(&self.state)
    }

    /// Adds an extra starting URL. An invalid URL is logged and ignored,
    /// and so is any URL added once the engine can no longer fetch it
    /// (crawl stopping or stopped, or the engine already finished).
    pub fn add_seed_url(&self, url: &str) -> bool {
        let state = self.state();
        if matches!(state, CrawlState::Stopping | CrawlState::Stopped)
            || self.engine_done.load(Ordering::SeqCst)
        {
            warn!(state = ?state, "URL {} added after the crawl ended. Ignore it.", url);
            return false;
        }

        match NormalizedUrl::parse(url) {
            Ok(seed) => {
                self.engine.enqueue_seed(&seed);
                true
            }
            Err(e) => {
                warn!(error = %e, "URL {} is invalid. Ignore it.", url);
                false
            }
        }
    }

    /// Starts crawling from `config.seed_url`, dispatching pages to `sink`.
    ///
    /// An invalid seed URL or pattern fails before the engine is touched.
    /// If the engine itself refuses to begin, the error is returned and the
    /// controller stays Idle, but the seed has already been handed to the
    /// engine: it must be queued before the engine's crawl task starts.
    pub fn start(&self, config: CrawlConfig, sink: Arc<dyn PageSink>) -> Result<(), CrawlError> {
        let mut state = lock(&self.state);
        if *state != CrawlState::Idle {
            return Err(CrawlError::AlreadyStarted);
        }

        let seed = NormalizedUrl::parse(&config.seed_url)?;
        let budget = Arc::new(RemainingBudget::new(config.maximum_urls));
        let filters = AdmissionFilters::from_config(&config, budget)?;

        self.engine.enqueue_seed(&seed);

        let dispatcher = Arc::new(Dispatcher::new(sink));
        let (tx, rx) = mpsc::unbounded_channel();
        self.engine.begin(config.fetch_options(), tx)?;

        info!(
            seed = %seed,
            maximum_depth = config.maximum_depth,
            maximum_urls = config.maximum_urls,
            "crawl started"
        );
        *state = CrawlState::Running;

        let events = tokio::spawn(
            EventLoop {
                filters,
                dispatcher: Arc::clone(&dispatcher),
                engine: Arc::clone(&self.engine),
                state: Arc::clone(&self.state),
                engine_done: Arc::clone(&self.engine_done),
                summary: CrawlSummary::default(),
            }
            .run(rx),
        );

        *lock(&self.run) = Some(RunningCrawl {
            dispatcher,
            events: Some(events),
        });
        Ok(())
    }

    /// Stops the crawl: discards every queued page, halts the engine.
    /// Pages the sink is already working on are left to finish.
    /// Calling it more than once has no further effect.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == CrawlState::Stopped {
                return;
            }
            *state = CrawlState::Stopped;
        }

        if let Some(run) = lock(&self.run).as_ref() {
            run.dispatcher.shutdown();
        }
        self.engine.halt_all();
        info!("crawl stopped");
    }

    /// Waits for the engine to run out of pages and for every bucket to
    /// drain, then stops the crawl and returns its counters.
    pub async fn wait(&self) -> CrawlSummary {
        let (dispatcher, events) = {
            let mut run = lock(&self.run);
            match run.as_mut() {
                Some(run) => (Arc::clone(&run.dispatcher), run.events.take()),
                None => return CrawlSummary::default(),
            }
        };

        let mut summary = match events {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "crawl event loop failed");
                CrawlSummary::default()
            }),
            None => CrawlSummary::default(),
        };

        dispatcher.wait_idle().await;
        self.stop();

        summary.buckets = dispatcher.bucket_count();
        info!(
            discovered = summary.discovered,
            admitted = summary.admitted,
            rejected = summary.rejected,
            fetch_errors = summary.fetch_errors,
            buckets = summary.buckets,
            "crawl finished"
        );
        summary
    }

    /// Pages queued or being audited right now
    pub fn pending(&self) -> usize {
        lock(&self.run)
            .as_ref()
            .map_or(0, |run| run.dispatcher.pending())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EventLoop {
    filters: AdmissionFilters,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<dyn FetchEngine>,
    state: Arc<Mutex<CrawlState>>,
    engine_done: Arc<AtomicBool>,
    summary: CrawlSummary,
}

impl EventLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<FetchEvent>) -> CrawlSummary {
        while let Some(event) = events.recv().await {
            match event {
                FetchEvent::Completed(item) => {
                    self.summary.discovered += 1;
                    self.admit(item);
                }
                FetchEvent::Redirected { item, location } => {
                    self.summary.redirects += 1;
                    info!("{} redirects to {}.", item.url, location);
                }
                FetchEvent::NotFound(item) => {
                    self.summary.fetch_errors += 1;
                    warn!("{} responds with a 404.", item.url);
                }
                FetchEvent::Failed { item, reason } => {
                    self.summary.fetch_errors += 1;
                    warn!(reason = %reason, "{} failed to fetch (status code: {}).", item.url, status_text(&item));
                }
            }
        }
        self.engine_done.store(true, Ordering::SeqCst);
        self.summary
    }

    fn admit(&mut self, item: QueueItem) {
        // Fetches that were in flight when stop() ran still report here.
        // They must not spend budget or look admitted.
        if self.dispatcher.is_shut_down() {
            info!("Fetched: {}; dropped, crawl stopped.", item.url);
            self.summary.dropped += 1;
            return;
        }

        let url = match NormalizedUrl::parse(&item.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "discovered URL skipped");
                self.summary.rejected += 1;
                return;
            }
        };

        match self.filters.evaluate(&url, item.content_type.as_deref()) {
            Admission::Accepted => {
                let bucket = BucketKey::for_url(&url);
                info!("[{}] Fetched: {}.", bucket, item.url);
                if self.dispatcher.submit(bucket, item.url) {
                    self.summary.admitted += 1;
                } else {
                    // stop() ran between the check above and the submit
                    self.summary.dropped += 1;
                }
            }
            Admission::Rejected(rejection) => {
                info!("Fetched: {}; {}.", item.url, rejection.reason());
                self.summary.rejected += 1;

                if rejection == Rejection::BudgetExhausted {
                    self.budget_exhausted();
                }
            }
        }
    }

    fn budget_exhausted(&self) {
        let mut state = lock(&self.state);
        if *state == CrawlState::Running {
            info!(
                remaining = self.filters.budget().remaining(),
                "maximum URLs reached, no new pages will be fetched"
            );
            *state = CrawlState::Stopping;
            self.engine.halt_all();
        }
    }
}

fn status_text(item: &QueueItem) -> String {
    item.status
        .map_or_else(|| "none".to_string(), |code| code.to_string())
}
