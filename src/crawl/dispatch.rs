// src/crawl/dispatch.rs
// =============================================================================
// Per-bucket dispatch queues.
//
// Every bucket gets its own lane: an unbounded FIFO channel plus one tokio
// task that feeds the page sink. A lane hands over ONE page, then waits for
// that page's Completion before it hands over the next. Lanes do not wait
// for each other, so buckets are audited in parallel while pages inside a
// bucket are audited strictly one after the other, in submission order.
//
//   submit("blog", url) --> [blog lane] --> sink.accept(item) --> complete()
//                                 ^                                   |
//                                 +-------- next page released -------+
//
// Lanes are created on the first page routed to their bucket and live until
// shutdown(). Shutdown cancels every lane: queued pages are discarded, pages
// already handed to the sink are left alone (the sink owns them).
//
// If the sink never completes a page its bucket stalls forever. There is no
// timeout here; the sink is responsible for bounding its own work.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bucket::BucketKey;

/// Releases the owning bucket's next page.
///
/// `complete` consumes the handle, so a page can only be completed once.
/// Dropping the handle without completing also releases the bucket, but
/// logs a warning.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<()>,
}

impl Completion {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn complete(self) {
        // the lane may already be gone after shutdown; nothing to release then
        let _ = self.tx.send(());
    }
}

/// A page handed to the sink
#[derive(Debug)]
pub struct PendingItem {
    pub url: String,
    pub bucket: BucketKey,
    pub completion: Completion,
}

impl PendingItem {
    #[cfg(test)]
    pub(crate) fn detached(url: &str, bucket: &str) -> (Self, oneshot::Receiver<()>) {
        let (completion, rx) = Completion::new();
        let item = PendingItem {
            url: url.to_string(),
            bucket: BucketKey::for_path(bucket),
            completion,
        };
        (item, rx)
    }

    /// Signals that the sink is done with this page
    pub fn complete(self) {
        self.completion.complete();
    }
}

/// The downstream consumer of dispatched pages.
///
/// `accept` is called from the bucket's lane and must return quickly: do
/// the actual work on another task and call `item.complete()` when done,
/// whether the work succeeded or not.
pub trait PageSink: Send + Sync + 'static {
    fn accept(&self, item: PendingItem);
}

impl<F> PageSink for F
where
    F: Fn(PendingItem) + Send + Sync + 'static,
{
    fn accept(&self, item: PendingItem) {
        self(item)
    }
}

// Counts queued + in-flight pages across all lanes so callers can wait
// for the whole dispatcher to go quiet
#[derive(Default)]
struct PendingTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl PendingTracker {
    fn add(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register before checking so a notify in between is not lost
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct Dispatcher {
    sink: Arc<dyn PageSink>,
    lanes: Mutex<HashMap<BucketKey, mpsc::UnboundedSender<String>>>,
    shutdown: CancellationToken,
    tracker: Arc<PendingTracker>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn PageSink>) -> Self {
        Self {
            sink,
            lanes: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: Arc::new(PendingTracker::default()),
        }
    }

    /// Queues `url` in `bucket`, creating the bucket's lane if needed.
    ///
    /// Never waits. Returns false if the dispatcher is shut down and the
    /// page was dropped.
    pub fn submit(&self, bucket: BucketKey, url: String) -> bool {
        if self.shutdown.is_cancelled() {
            debug!(bucket = %bucket, url = %url, "dispatcher stopped, page dropped");
            return false;
        }

        let mut lanes = self.lanes();
        let lane = lanes
            .entry(bucket.clone())
            .or_insert_with(|| self.spawn_lane(bucket.clone()));

        info!("[{}] Enqueue: {}", bucket, url);

        self.tracker.add();
        if lane.send(url).is_err() {
            // lane already exited because of shutdown
            self.tracker.done();
            return false;
        }
        true
    }

    /// Stops every lane. Queued pages are discarded; pages the sink is
    /// currently working on are not interrupted. Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        info!(buckets = self.bucket_count(), "dispatch queues shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of buckets created so far
    pub fn bucket_count(&self) -> usize {
        self.lanes().len()
    }

    /// Pages queued or in flight across every bucket
    pub fn pending(&self) -> usize {
        self.tracker.count()
    }

    /// Resolves once no page is queued or in flight
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<BucketKey, mpsc::UnboundedSender<String>>> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_lane(&self, bucket: BucketKey) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(bucket = %bucket, "bucket created");

        tokio::spawn(run_lane(
            bucket,
            rx,
            Arc::clone(&self.sink),
            self.shutdown.clone(),
            Arc::clone(&self.tracker),
        ));
        tx
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_lane(
    bucket: BucketKey,
    mut queue: mpsc::UnboundedReceiver<String>,
    sink: Arc<dyn PageSink>,
    shutdown: CancellationToken,
    tracker: Arc<PendingTracker>,
) {
    loop {
        // Idle: wait for the next page. `biased` checks shutdown first so a
        // cancelled lane never hands out one more page.
        let url = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(url) => url,
                None => break,
            },
        };

        info!("[{}] Waiting to run: {}", bucket, url);

        // Busy: hand the page over together with a fresh completion handle
        let (completion, released) = Completion::new();
        sink.accept(PendingItem {
            url: url.clone(),
            bucket: bucket.clone(),
            completion,
        });

        // Block this lane (and only this lane) until the sink completes the
        // page, drops its handle, or the dispatcher shuts down
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                // the sink keeps the page; we just stop waiting for it
                tracker.done();
                break;
            }
            outcome = released => outcome,
        };

        // Err means the Completion was dropped unsignalled; treat it as done
        if outcome.is_err() {
            warn!(bucket = %bucket, url = %url, "completion dropped without being signalled");
        }
        debug!(bucket = %bucket, url = %url, "page completed");
        tracker.done();
    }

    // Shutdown: refuse further sends, then throw away what is still queued
    // so that wait_idle() sees the pending count reach zero
    queue.close();
    let mut discarded = 0usize;
    while queue.try_recv().is_ok() {
        discarded += 1;
        tracker.done();
    }
    if discarded > 0 {
        info!(bucket = %bucket, discarded, "queued pages discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    // Keeps every page it receives until the test completes it
    #[derive(Default)]
    struct HoldingSink {
        items: Mutex<Vec<PendingItem>>,
    }

    impl HoldingSink {
        fn len(&self) -> usize {
            self.items.lock().unwrap().len()
        }

        fn take(&self, index: usize) -> PendingItem {
            self.items.lock().unwrap().remove(index)
        }

        fn urls(&self) -> Vec<String> {
            self.items.lock().unwrap().iter().map(|i| i.url.clone()).collect()
        }

        async fn wait_for(&self, n: usize) {
            timeout(Duration::from_secs(2), async {
                while self.len() < n {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("sink never received the expected pages");
        }
    }

    impl PageSink for HoldingSink {
        fn accept(&self, item: PendingItem) {
            self.items.lock().unwrap().push(item);
        }
    }

    fn key(name: &str) -> BucketKey {
        BucketKey::for_path(name)
    }

    #[tokio::test]
    async fn test_same_bucket_is_serialized_in_order() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = {
            let (active, max_active, seen) = (active.clone(), max_active.clone(), seen.clone());
            move |item: PendingItem| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                seen.lock().unwrap().push(item.url.clone());

                let active = active.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    item.complete();
                });
            }
        };

        let dispatcher = Dispatcher::new(Arc::new(sink));
        let urls: Vec<String> = (0..5).map(|i| format!("https://example.com/blog/{i}")).collect();
        for url in &urls {
            assert!(dispatcher.submit(key("blog"), url.clone()));
        }

        timeout(Duration::from_secs(2), dispatcher.wait_idle()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), urls);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_next_page_waits_for_completion() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());

        dispatcher.submit(key("docs"), "a".to_string());
        dispatcher.submit(key("docs"), "b".to_string());

        sink.wait_for(1).await;
        sleep(Duration::from_millis(30)).await;
        assert_eq!(sink.urls(), vec!["a"]);
        assert_eq!(dispatcher.pending(), 2);

        sink.take(0).complete();
        sink.wait_for(1).await;
        assert_eq!(sink.urls(), vec!["b"]);

        sink.take(0).complete();
        timeout(Duration::from_secs(2), dispatcher.wait_idle()).await.unwrap();
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_buckets_run_in_parallel() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());

        dispatcher.submit(key("a"), "a/1".to_string());
        dispatcher.submit(key("b"), "b/1".to_string());
        dispatcher.submit(key("c"), "c/1".to_string());

        // all three are out at once even though none has completed
        sink.wait_for(3).await;
        assert_eq!(dispatcher.bucket_count(), 3);
    }

    #[tokio::test]
    async fn test_stalled_bucket_does_not_block_others() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());

        dispatcher.submit(key("slow"), "slow/1".to_string());
        sink.wait_for(1).await;

        dispatcher.submit(key("slow"), "slow/2".to_string());
        dispatcher.submit(key("fast"), "fast/1".to_string());
        sink.wait_for(2).await;

        let mut urls = sink.urls();
        urls.sort();
        assert_eq!(urls, vec!["fast/1", "slow/1"]);
    }

    #[tokio::test]
    async fn test_dropped_completion_releases_bucket() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());

        dispatcher.submit(key("x"), "x/1".to_string());
        dispatcher.submit(key("x"), "x/2".to_string());
        sink.wait_for(1).await;

        drop(sink.take(0));
        sink.wait_for(1).await;
        assert_eq!(sink.urls(), vec!["x/2"]);
    }

    #[tokio::test]
    async fn test_shutdown_discards_queued_pages() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());

        for i in 0..3 {
            dispatcher.submit(key("blog"), format!("blog/{i}"));
        }
        sink.wait_for(1).await;

        dispatcher.shutdown();
        timeout(Duration::from_secs(2), dispatcher.wait_idle()).await.unwrap();
        assert_eq!(dispatcher.pending(), 0);

        // the in-flight page is still owned by the sink and can complete late
        sink.take(0).complete();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.len(), 0);

        assert!(!dispatcher.submit(key("blog"), "blog/late".to_string()));
        assert!(!dispatcher.submit(key("new"), "new/1".to_string()));
        assert_eq!(dispatcher.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let sink = Arc::new(HoldingSink::default());
        let dispatcher = Dispatcher::new(sink.clone());
        dispatcher.submit(key("a"), "a/1".to_string());
        sink.wait_for(1).await;

        dispatcher.shutdown();
        dispatcher.shutdown();

        assert!(dispatcher.is_shut_down());
        timeout(Duration::from_secs(2), dispatcher.wait_idle()).await.unwrap();
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_on_fresh_dispatcher() {
        let dispatcher = Dispatcher::new(Arc::new(|item: PendingItem| item.complete()));
        timeout(Duration::from_millis(100), dispatcher.wait_idle()).await.unwrap();
        assert_eq!(dispatcher.bucket_count(), 0);
    }

    #[test]
    fn test_detached_item_signals_receiver() {
        let (item, mut rx) = PendingItem::detached("https://example.com/a", "/a");
        assert_eq!(item.bucket.as_str(), "a");
        item.complete();
        assert!(rx.try_recv().is_ok());
    }
}
