// src/crawl/engine.rs
// =============================================================================
// The fetch engine: downloads pages, follows links, reports what it found.
//
// The controller only talks to the FetchEngine trait:
//   enqueue_seed(url)  - add a starting point (the first one fixes the origin)
//   begin(options, tx) - start crawling, sending FetchEvents on `tx`
//   halt_all()         - stop starting new fetches
//
// HttpFetchEngine is the real implementation. It crawls breadth-first:
// 1. Seeds go into the frontier at depth 1
// 2. Up to `max_concurrency` pages are fetched at once, each fetch start
//    spaced by `fetch_interval`
// 3. Same-origin links found on HTML pages are queued at depth + 1
// 4. Redirects are not followed by the HTTP client: a 3xx is reported as
//    FetchEvent::Redirected and its same-origin target is queued at the
//    same depth, so only the final page is ever reported as Completed
// 5. Every URL is fetched at most once
// 6. When nothing is queued or in flight the event channel is closed
//
// After halt_all() fetches already in flight still finish and still report
// their event; nothing new is started.
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::filter::is_html;
use super::links::{extract_links, strip_fragment};
use super::url::NormalizedUrl;
use crate::error::CrawlError;

/// A fetched (or attempted) page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub url: String,
    /// 1 for seeds, +1 per link hop
    pub depth: usize,
    /// HTTP status, None if the request never got a response
    pub status: Option<u16>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// 2xx response
    Completed(QueueItem),
    /// 404 response
    NotFound(QueueItem),
    /// 3xx response; `location` is the absolute redirect target
    Redirected { item: QueueItem, location: String },
    /// Any other status, or a transport error
    Failed { item: QueueItem, reason: String },
}

/// Per-crawl options derived from CrawlConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// 0 = unlimited
    pub max_depth: usize,
    pub tls_verify: bool,
}

pub trait FetchEngine: Send + Sync + 'static {
    fn enqueue_seed(&self, seed: &NormalizedUrl);

    fn begin(
        &self,
        options: FetchOptions,
        events: mpsc::UnboundedSender<FetchEvent>,
    ) -> Result<(), CrawlError>;

    fn halt_all(&self);
}

/// Fixed knobs of the HTTP engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub fetch_interval: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Only follow links on the first seed's host
    pub domain_restricted: bool,
    /// Honour HTTP(S)_PROXY environment variables
    pub use_system_proxy: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            fetch_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(10),
            user_agent: format!("a11y-crawler/{}", env!("CARGO_PKG_VERSION")),
            domain_restricted: true,
            use_system_proxy: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CrawlItem {
    url: String,
    depth: usize,
}

// A response boiled down to what the crawl loop needs
struct Fetched {
    status: StatusCode,
    content_type: Option<String>,
    links: Vec<Url>,
    /// Resolved Location header of a 3xx
    location: Option<Url>,
}

// State shared between the engine handle and its crawl task
struct EngineShared {
    seeds: Mutex<VecDeque<String>>,
    origin: Mutex<Option<String>>,
    halt: CancellationToken,
}

impl EngineShared {
    fn take_seeds(&self) -> Vec<String> {
        let mut seeds = self.seeds.lock().unwrap_or_else(|e| e.into_inner());
        seeds.drain(..).collect()
    }

    fn origin(&self) -> Option<String> {
        self.origin.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct HttpFetchEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    started: AtomicBool,
}

impl HttpFetchEngine {
    pub fn new(config: EngineConfig) -> Result<Self, CrawlError> {
        if config.max_concurrency == 0 {
            return Err(CrawlError::InvalidConfig(
                "fetch concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            config,
            shared: Arc::new(EngineShared {
                seeds: Mutex::new(VecDeque::new()),
                origin: Mutex::new(None),
                halt: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
        })
    }

    /// Host every followed link must be on, set by the first seed
    pub fn origin_host(&self) -> Option<String> {
        self.shared.origin()
    }

    fn build_client(&self, options: FetchOptions) -> Result<Client, CrawlError> {
        let mut builder = Client::builder()
            .timeout(self.config.request_timeout)
            .user_agent(self.config.user_agent.clone())
            // redirects become events of their own, see CrawlLoop::report
            .redirect(Policy::none())
            .danger_accept_invalid_certs(!options.tls_verify);

        if !self.config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(builder.build()?)
    }
}

impl FetchEngine for HttpFetchEngine {
    fn enqueue_seed(&self, seed: &NormalizedUrl) {
        {
            let mut origin = self.shared.origin.lock().unwrap_or_else(|e| e.into_inner());
            if origin.is_none() {
                info!(host = %seed.host, protocol = %seed.protocol, port = seed.port, "crawl origin set");
                *origin = Some(seed.host.clone());
            }
        }

        self.shared
            .seeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(seed.to_string());
    }

    fn begin(
        &self,
        options: FetchOptions,
        events: mpsc::UnboundedSender<FetchEvent>,
    ) -> Result<(), CrawlError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::AlreadyStarted);
        }

        let client = self.build_client(options)?;
        let crawl = CrawlLoop {
            client,
            config: self.config.clone(),
            options,
            shared: Arc::clone(&self.shared),
            events,
        };

        tokio::spawn(crawl.run());
        Ok(())
    }

    fn halt_all(&self) {
        if !self.shared.halt.is_cancelled() {
            info!("fetch engine halted, no new fetches will start");
            self.shared.halt.cancel();
        }
    }
}

struct CrawlLoop {
    client: Client,
    config: EngineConfig,
    options: FetchOptions,
    shared: Arc<EngineShared>,
    events: mpsc::UnboundedSender<FetchEvent>,
}

impl CrawlLoop {
    async fn run(self) {
        let mut frontier: VecDeque<CrawlItem> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut in_flight: JoinSet<(CrawlItem, Result<Fetched, reqwest::Error>)> = JoinSet::new();
        let mut next_start = Instant::now();

        loop {
            // Seeds added with enqueue_seed() while crawling join the frontier here
            for url in self.shared.take_seeds() {
                frontier.push_back(CrawlItem { url, depth: 1 });
            }

            // Start as many fetches as the concurrency cap allows
            while !self.halted() && in_flight.len() < self.config.max_concurrency {
                let Some(item) = frontier.pop_front() else {
                    break;
                };
                // A URL can be queued twice before its first fetch starts;
                // the visited check at start time is the one that counts
                if !visited.insert(strip_fragment(&item.url).to_string()) {
                    continue;
                }

                // Space fetch starts out, but wake up at once on halt_all()
                tokio::select! {
                    _ = self.shared.halt.cancelled() => {
                        frontier.push_front(item);
                        break;
                    }
                    _ = sleep_until(next_start) => {}
                }
                next_start = Instant::now() + self.config.fetch_interval;

                debug!(url = %item.url, depth = item.depth, "fetching");
                let client = self.client.clone();
                in_flight.spawn(async move {
                    let result = fetch_page(&client, &item.url).await;
                    (item, result)
                });
            }

            // Nothing running: either the frontier is drained (done), the
            // engine is halted (done), or every popped URL was already visited
            // and the frontier still has more to try
            if in_flight.is_empty() {
                if !frontier.is_empty() && !self.halted() {
                    continue;
                }
                break;
            }

            // Fetches in flight always run to completion and report, even
            // after halt_all(); only the starting of new ones is stopped
            let Some(joined) = in_flight.join_next().await else {
                continue;
            };

            match joined {
                Ok((item, result)) => {
                    if !self.report(item, result, &mut frontier, &visited) {
                        // nobody is listening anymore
                        self.shared.halt.cancel();
                    }
                }
                Err(e) => warn!(error = %e, "fetch task failed"),
            }
        }

        debug!(visited = visited.len(), "fetch engine finished");
    }

    fn halted(&self) -> bool {
        self.shared.halt.is_cancelled()
    }

    // Turns a finished fetch into an event and queues its links.
    // Returns false if the event receiver is gone.
    fn report(
        &self,
        item: CrawlItem,
        result: Result<Fetched, reqwest::Error>,
        frontier: &mut VecDeque<CrawlItem>,
        visited: &HashSet<String>,
    ) -> bool {
        let event = match result {
            Ok(fetched) => {
                let queue_item = QueueItem {
                    url: item.url.clone(),
                    depth: item.depth,
                    status: Some(fetched.status.as_u16()),
                    content_type: fetched.content_type,
                };

                if fetched.status.is_success() {
                    self.follow_links(&item, fetched.links, frontier, visited);
                    FetchEvent::Completed(queue_item)
                } else if fetched.status.is_redirection() {
                    match fetched.location {
                        Some(target) => {
                            debug!(from = %item.url, to = %target, "redirect");
                            let location = target.to_string();
                            // the target replaces the redirecting URL, so it keeps its depth
                            self.queue(target, item.depth, frontier, visited);
                            FetchEvent::Redirected {
                                item: queue_item,
                                location,
                            }
                        }
                        None => FetchEvent::Failed {
                            item: queue_item,
                            reason: format!(
                                "HTTP {} without a Location header",
                                fetched.status.as_u16()
                            ),
                        },
                    }
                } else if fetched.status == StatusCode::NOT_FOUND {
                    FetchEvent::NotFound(queue_item)
                } else {
                    FetchEvent::Failed {
                        item: queue_item,
                        reason: format!("HTTP {}", fetched.status.as_u16()),
                    }
                }
            }
            Err(e) => FetchEvent::Failed {
                item: QueueItem {
                    url: item.url,
                    depth: item.depth,
                    status: None,
                    content_type: None,
                },
                reason: e.to_string(),
            },
        };

        self.events.send(event).is_ok()
    }

    fn follow_links(
        &self,
        parent: &CrawlItem,
        links: Vec<Url>,
        frontier: &mut VecDeque<CrawlItem>,
        visited: &HashSet<String>,
    ) {
        let depth = parent.depth + 1;
        if !within_depth(depth, self.options.max_depth) {
            return;
        }

        for link in links {
            self.queue(link, depth, frontier, visited);
        }
    }

    // Adds `url` to the frontier unless it is off-origin or already fetched
    fn queue(
        &self,
        mut url: Url,
        depth: usize,
        frontier: &mut VecDeque<CrawlItem>,
        visited: &HashSet<String>,
    ) {
        if self.config.domain_restricted && url.host_str() != self.shared.origin().as_deref() {
            return;
        }
        url.set_fragment(None);
        if visited.contains(url.as_str()) {
            return;
        }
        frontier.push_back(CrawlItem {
            url: url.into(),
            depth,
        });
    }
}

fn within_depth(depth: usize, max_depth: usize) -> bool {
    max_depth == 0 || depth <= max_depth
}

// Fetches a page. The body is only downloaded (and its links extracted)
// for successful HTML responses.
async fn fetch_page(client: &Client, url: &str) -> Result<Fetched, reqwest::Error> {
    let response = client.get(url).send().await?;

    let status = response.status();
    let base = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|target| base.join(target).ok());

    let links = if status.is_success() && is_html(content_type.as_deref()) {
        let html = response.text().await?;
        extract_links(&html, &base)
    } else {
        Vec::new()
    };

    Ok(Fetched {
        status,
        content_type,
        links,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::testing::{Route, Routes, TestServer};
    use tokio::time::{sleep, timeout};

    fn test_engine() -> HttpFetchEngine {
        HttpFetchEngine::new(EngineConfig {
            fetch_interval: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            use_system_proxy: false,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<FetchEvent>) -> Vec<FetchEvent> {
        timeout(Duration::from_secs(10), async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        })
        .await
        .expect("engine never closed its event channel")
    }

    #[test]
    fn test_within_depth() {
        assert!(within_depth(1, 1));
        assert!(!within_depth(2, 1));
        assert!(within_depth(50, 0));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            HttpFetchEngine::new(config),
            Err(CrawlError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_first_seed_sets_origin() {
        let engine = test_engine();
        engine.enqueue_seed(&NormalizedUrl::parse("https://example.com/a").unwrap());
        engine.enqueue_seed(&NormalizedUrl::parse("https://other.org/b").unwrap());
        assert_eq!(engine.origin_host().as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_crawls_site_breadth_first() {
        let mut routes = Routes::new();
        routes.insert(
            "/",
            Route::html(
                r#"<a href="/about">About</a>
                   <a href="/about#team">Team</a>
                   <a href="/missing">Gone</a>
                   <a href="/broken">Broken</a>
                   <a href="/data.json">Data</a>
                   <a href="https://elsewhere.example/x">External</a>"#,
            ),
        );
        routes.insert("/about", Route::new(200, "text/html", r#"<a href="/deep/page">Deep</a>"#));
        routes.insert("/broken", Route::new(500, "text/plain", "oops"));
        routes.insert("/data.json", Route::new(200, "application/json", "{}"));
        routes.insert("/deep/page", Route::new(200, "text/html", "too deep"));
        let server = TestServer::start(routes).await;
        let addr = server.addr;

        let engine = test_engine();
        engine.enqueue_seed(&NormalizedUrl::parse(&server.url("/")).unwrap());

        let (tx, rx) = mpsc::unbounded_channel();
        engine
            .begin(FetchOptions { max_depth: 2, tls_verify: true }, tx)
            .unwrap();
        let events = collect(rx).await;

        let base = format!("http://{addr}");
        let mut completed: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                FetchEvent::Completed(item) => Some(item.url.clone()),
                _ => None,
            })
            .collect();
        completed.sort();
        assert_eq!(
            completed,
            vec![
                format!("{base}/"),
                format!("{base}/about"),
                format!("{base}/data.json"),
            ]
        );

        assert!(events.iter().any(|e| matches!(
            e,
            FetchEvent::NotFound(item) if item.url == format!("{base}/missing")
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            FetchEvent::Failed { item, .. } if item.status == Some(500)
        )));

        let json = events
            .iter()
            .find_map(|e| match e {
                FetchEvent::Completed(item) if item.url.ends_with("/data.json") => Some(item),
                _ => None,
            })
            .unwrap();
        assert_eq!(json.content_type.as_deref(), Some("application/json"));
        assert_eq!(json.depth, 2);
    }

    #[tokio::test]
    async fn test_halt_before_begin_fetches_nothing() {
        let engine = test_engine();
        engine.enqueue_seed(&NormalizedUrl::parse("http://127.0.0.1:9/").unwrap());
        engine.halt_all();

        let (tx, rx) = mpsc::unbounded_channel();
        engine
            .begin(FetchOptions { max_depth: 0, tls_verify: true }, tx)
            .unwrap();
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_begin_twice_fails() {
        let engine = test_engine();
        engine.halt_all();
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = FetchOptions { max_depth: 1, tls_verify: true };
        engine.begin(options, tx.clone()).unwrap();
        assert!(matches!(engine.begin(options, tx), Err(CrawlError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_redirect_is_reported_and_its_target_fetched() {
        let mut routes = Routes::new();
        routes.insert("/", Route::redirect("/home"));
        routes.insert("/home", Route::html(r#"<a href="/">Start</a>"#));
        let server = TestServer::start(routes).await;

        let engine = test_engine();
        engine.enqueue_seed(&NormalizedUrl::parse(&server.url("/")).unwrap());

        let (tx, rx) = mpsc::unbounded_channel();
        engine
            .begin(FetchOptions { max_depth: 1, tls_verify: true }, tx)
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 2, "{events:?}");
        match &events[0] {
            FetchEvent::Redirected { item, location } => {
                assert_eq!(item.url, server.url("/"));
                assert_eq!(item.status, Some(301));
                assert_eq!(*location, server.url("/home"));
            }
            other => panic!("expected a redirect, got {other:?}"),
        }
        match &events[1] {
            FetchEvent::Completed(item) => {
                assert_eq!(item.url, server.url("/home"));
                // the target keeps the depth of the URL that redirected to it
                assert_eq!(item.depth, 1);
            }
            other => panic!("expected /home to complete, got {other:?}"),
        }
        assert_eq!(server.hits(), vec!["/", "/home"]);
    }

    #[tokio::test]
    async fn test_redirect_off_origin_is_not_followed() {
        let mut routes = Routes::new();
        routes.insert("/", Route::redirect("https://elsewhere.example/"));
        let server = TestServer::start(routes).await;

        let engine = test_engine();
        engine.enqueue_seed(&NormalizedUrl::parse(&server.url("/")).unwrap());

        let (tx, rx) = mpsc::unbounded_channel();
        engine
            .begin(FetchOptions { max_depth: 0, tls_verify: true }, tx)
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            FetchEvent::Redirected { location, .. } if location == "https://elsewhere.example/"
        ));
    }

    #[tokio::test]
    async fn test_halt_lets_in_flight_fetch_finish() {
        let mut routes = Routes::new();
        routes.insert("/", Route::html(r#"<a href="/slow">Slow</a> <a href="/next">Next</a>"#));
        routes.insert(
            "/slow",
            Route::html("slow page").delayed(Duration::from_millis(400)),
        );
        routes.insert("/next", Route::html("never fetched"));
        let server = TestServer::start(routes).await;

        // one fetch at a time: /slow is in flight, /next waits in the frontier
        let engine = HttpFetchEngine::new(EngineConfig {
            max_concurrency: 1,
            fetch_interval: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            use_system_proxy: false,
            ..EngineConfig::default()
        })
        .unwrap();
        engine.enqueue_seed(&NormalizedUrl::parse(&server.url("/")).unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .begin(FetchOptions { max_depth: 0, tls_verify: true }, tx)
            .unwrap();

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(matches!(first, Some(FetchEvent::Completed(ref item)) if item.url == server.url("/")));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(server.hits(), vec!["/", "/slow"]);
        engine.halt_all();

        let rest = collect(rx).await;
        assert_eq!(rest.len(), 1, "{rest:?}");
        assert!(matches!(&rest[0], FetchEvent::Completed(item) if item.url == server.url("/slow")));
        assert_eq!(server.hits(), vec!["/", "/slow"]);
    }
}
