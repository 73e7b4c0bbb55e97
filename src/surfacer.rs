//! # Probe status surfacer
//!
//! ## Responsibility
//! Owns the series registry and the page cache, and is the only task that
//! touches either. Producers hand events over through a bounded queue;
//! dashboard readers hand queries over through a second bounded queue.
//!
//! ```text
//! producers ──write()──► [event queue] ──┐
//!                                        ├──► ProbeStatus::run ──► SeriesRegistry
//! HTTP GET ───query()──► [query queue] ──┘            │
//!                                                     └──► PageCache / Renderer
//! ```
//!
//! ## Guarantees
//! - Single writer: no lock guards the registry or series.
//! - `write` never blocks; a full queue drops the event and logs a warning.
//! - `query` waits for a free slot in the query queue and then for its answer.
//! - Each queue is FIFO. Between the two queues there is no ordering: the
//!   loop picks randomly among ready branches, so a query sent after an
//!   event may be answered before that event is recorded.
//! - Cancellation ends the loop; whatever is still queued is abandoned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::PageCache;
use crate::config::SurfacerConfig;
use crate::dashboard::{build_page, dashboard_durations, Renderer};
use crate::error::StatusError;
use crate::event::{extract_datum, EventMetrics};
use crate::registry::{RecordOutcome, SeriesRegistry};
use crate::server::{Handler, Request, Response, Router};
use crate::sysvars::ProcessInfo;

type Reply = oneshot::Sender<Result<Arc<[u8]>, StatusError>>;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters describing what happened to events and queries since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfacerStats {
    /// Events placed on the event queue.
    pub events_queued: u64,
    /// Events dropped because the queue was full or the actor had stopped.
    pub events_dropped: u64,
    /// Events recorded into a series.
    pub events_accepted: u64,
    /// Events rejected by validation.
    pub events_discarded: u64,
    /// Events older than their series' current bucket.
    pub events_late: u64,
    /// Events for new targets of a probe already at capacity.
    pub targets_dropped: u64,
    /// Per-probe capacity warnings emitted.
    pub capacity_warnings: u64,
    pub queries_served: u64,
    pub cache_hits: u64,
    pub render_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_queued: AtomicU64,
    events_dropped: AtomicU64,
    events_accepted: AtomicU64,
    events_discarded: AtomicU64,
    events_late: AtomicU64,
    targets_dropped: AtomicU64,
    capacity_warnings: AtomicU64,
    queries_served: AtomicU64,
    cache_hits: AtomicU64,
    render_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SurfacerStats {
        SurfacerStats {
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            events_late: self.events_late.load(Ordering::Relaxed),
            targets_dropped: self.targets_dropped.load(Ordering::Relaxed),
            capacity_warnings: self.capacity_warnings.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeStatus actor
// ---------------------------------------------------------------------------

/// The actor. Build with [`ProbeStatus::new`], then drive with
/// [`run`](Self::run) or [`spawn`](Self::spawn).
pub struct ProbeStatus {
    registry: SeriesRegistry,
    cache: PageCache,
    renderer: Box<dyn Renderer>,
    process: ProcessInfo,
    durations: Vec<Duration>,
    lookback: Duration,
    events: mpsc::Receiver<EventMetrics>,
    queries: mpsc::Receiver<Reply>,
    counters: Arc<Counters>,
}

impl ProbeStatus {
    /// Validate `config` and build the actor together with the handle used
    /// to feed and query it. Nothing runs until the actor is driven.
    pub fn new(
        config: &SurfacerConfig,
        process: ProcessInfo,
        renderer: impl Renderer,
    ) -> Result<(ProbeStatus, ProbeStatusHandle), StatusError> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer_size);
        let (query_tx, query_rx) = mpsc::channel(config.query_queue_size);
        let counters = Arc::new(Counters::default());
        let span = config.total_span();

        let actor = ProbeStatus {
            registry: SeriesRegistry::new(
                config.resolution(),
                config.timeseries_size,
                config.max_targets_per_probe,
            ),
            cache: PageCache::new(config.cache_max_age()),
            renderer: Box::new(renderer),
            process,
            durations: dashboard_durations(config.resolution(), span),
            lookback: span,
            events: event_rx,
            queries: query_rx,
            counters: Arc::clone(&counters),
        };
        let handle = ProbeStatusHandle {
            url: config.url.clone(),
            events: event_tx,
            queries: query_tx,
            counters,
        };

        info!(url = %config.url, "Initialized status surfacer");
        Ok((actor, handle))
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Process events and queries one at a time until `cancel` fires or
    /// every handle has been dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Context canceled, stopping the input/output processing loop");
                    return;
                }
                em = self.events.recv() => match em {
                    Some(em) => self.record(&em),
                    None => {
                        info!("All surfacer handles dropped, stopping the processing loop");
                        return;
                    }
                },
                Some(reply) = self.queries.recv() => self.answer(reply),
            }
        }
    }

    fn record(&mut self, em: &EventMetrics) {
        let sample = match extract_datum(em) {
            Ok(sample) => sample,
            Err(reason) => {
                debug!(reason = %reason, "discarding event");
                Counters::bump(&self.counters.events_discarded);
                return;
            }
        };

        let outcome = self
            .registry
            .record(sample.probe, sample.target, em.timestamp, sample.datum);
        let c = &self.counters;
        match outcome {
            RecordOutcome::Stored | RecordOutcome::NewTarget => Counters::bump(&c.events_accepted),
            RecordOutcome::NewTargetNearCapacity => {
                Counters::bump(&c.events_accepted);
                Counters::bump(&c.capacity_warnings);
            }
            RecordOutcome::TargetDropped => Counters::bump(&c.targets_dropped),
            RecordOutcome::Late => Counters::bump(&c.events_late),
        }
    }

    fn answer(&mut self, reply: Reply) {
        let page = self.page();
        Counters::bump(&self.counters.queries_served);
        // The caller may have given up waiting.
        let _ = reply.send(page);
    }

    fn page(&mut self) -> Result<Arc<[u8]>, StatusError> {
        if let Some(content) = self.cache.content_if_valid() {
            Counters::bump(&self.counters.cache_hits);
            return Ok(content);
        }

        match self.render_page() {
            Ok(content) => {
                self.cache.set_content(Arc::clone(&content));
                Ok(content)
            }
            Err(e) => {
                error!(error = %e, "Error rendering probe status page");
                Counters::bump(&self.counters.render_failures);
                Err(e)
            }
        }
    }

    fn render_page(&self) -> Result<Arc<[u8]>, StatusError> {
        let page = build_page(
            &self.registry,
            &self.durations,
            self.lookback,
            &self.process,
            Utc::now(),
        )?;
        let html = self.renderer.render(&page)?;
        Ok(Arc::from(html.into_bytes()))
    }
}

impl std::fmt::Debug for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeStatus")
            .field("probes", &self.registry.probe_names().len())
            .field("series", &self.registry.series_count())
            .field("durations", &self.durations)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProbeStatusHandle
// ---------------------------------------------------------------------------

/// Producer and reader side of the surfacer. Clone freely.
#[derive(Debug, Clone)]
pub struct ProbeStatusHandle {
    url: String,
    events: mpsc::Sender<EventMetrics>,
    queries: mpsc::Sender<Reply>,
    counters: Arc<Counters>,
}

impl ProbeStatusHandle {
    /// Queue an event for recording. Never blocks; when the queue is full the
    /// event is dropped.
    pub fn write(&self, em: EventMetrics) {
        match self.events.try_send(em) {
            Ok(()) => Counters::bump(&self.counters.events_queued),
            Err(TrySendError::Full(_)) => {
                Counters::bump(&self.counters.events_dropped);
                warn!(
                    capacity = self.events.max_capacity(),
                    "Surfacer's write channel is full, dropping new data"
                );
            }
            Err(TrySendError::Closed(_)) => {
                Counters::bump(&self.counters.events_dropped);
                debug!("Surfacer has stopped, dropping new data");
            }
        }
    }

    /// Ask the actor for the dashboard page and wait for it.
    ///
    /// Waits for room when the query queue is full.
    ///
    /// # Errors
    /// - [`StatusError::Stopped`] when the actor is no longer running.
    /// - [`StatusError::Render`] when the page could not be rendered.
    pub async fn query(&self) -> Result<Arc<[u8]>, StatusError> {
        let (tx, rx) = oneshot::channel();
        self.queries.send(tx).await.map_err(|_| StatusError::Stopped)?;
        rx.await.map_err(|_| StatusError::Stopped)?
    }

    /// Events waiting in the queue.
    pub fn queued_events(&self) -> usize {
        self.events.max_capacity() - self.events.capacity()
    }

    pub fn stats(&self) -> SurfacerStats {
        self.counters.snapshot()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Install the dashboard handler at the configured URL.
    pub fn register(&self, router: &mut Router) -> Result<(), StatusError> {
        router.handle(
            self.url.clone(),
            DashboardHandler {
                handle: self.clone(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// HTTP handler
// ---------------------------------------------------------------------------

struct DashboardHandler {
    handle: ProbeStatusHandle,
}

impl Handler for DashboardHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let handle = self.handle.clone();
        async move {
            if req.method != "GET" {
                return Response::text(405, "method not allowed\n").with_header("Allow", "GET");
            }
            match handle.query().await {
                Ok(body) => Response::html(body),
                Err(StatusError::Stopped) => Response::text(503, "probe status is not running\n"),
                Err(_) => Response::new(500, "text/html; charset=utf-8", Arc::from(Vec::new())),
            }
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{DashboardPage, HtmlRenderer};
    use crate::event::{PROBE_LABEL, TARGET_LABEL};
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;
    use std::task::Poll;
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_pending, assert_ready, task};

    fn config() -> SurfacerConfig {
        SurfacerConfig {
            cache_time_sec: 60,
            ..Default::default()
        }
    }

    fn event(probe: &str, target: &str, total: i64, success: i64) -> EventMetrics {
        EventMetrics::new(Utc::now())
            .add_label(PROBE_LABEL, probe)
            .add_label(TARGET_LABEL, target)
            .add_metric("total", total)
            .add_metric("success", success)
    }

    async fn wait_for(handle: &ProbeStatusHandle, done: impl Fn(&SurfacerStats) -> bool) {
        timeout(Duration::from_secs(2), async {
            while !done(&handle.stats()) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for the actor");
    }

    fn build(cfg: &SurfacerConfig, renderer: impl Renderer) -> (ProbeStatus, ProbeStatusHandle) {
        ProbeStatus::new(cfg, ProcessInfo::current(), renderer).unwrap()
    }

    async fn poll_until_ready<F: Future>(t: &mut task::Spawn<F>) -> F::Output {
        for _ in 0..400 {
            if let Poll::Ready(out) = t.poll() {
                return out;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("future never completed");
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl Renderer for Counting {
        fn render(&self, page: &DashboardPage) -> Result<String, StatusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            HtmlRenderer.render(page)
        }
    }

    struct Failing;

    impl Renderer for Failing {
        fn render(&self, _page: &DashboardPage) -> Result<String, StatusError> {
            Err(StatusError::Render("template exploded".into()))
        }
    }

    #[tokio::test]
    async fn test_written_events_show_up_on_the_page() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        handle.write(event("http", "example.com", 10, 9));
        wait_for(&handle, |s| s.events_accepted == 1).await;

        let page = handle.query().await.unwrap();
        let html = String::from_utf8(page.to_vec()).unwrap();
        assert!(html.contains("Probe: http"));
        assert!(html.contains("example.com"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_invalid_events_are_discarded() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        handle.write(event("sysvars", "", 1, 1));
        handle.write(EventMetrics::new(Utc::now()).add_label(PROBE_LABEL, "http"));
        wait_for(&handle, |s| s.events_discarded == 2).await;
        assert_eq!(handle.stats().events_accepted, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_event_queue_drops_without_blocking() {
        let cfg = SurfacerConfig {
            event_buffer_size: 3,
            ..config()
        };
        // Actor deliberately not running so the queue fills up.
        let (_actor, handle) = build(&cfg, HtmlRenderer);
        for i in 0..4 {
            handle.write(event("http", &format!("t{i}"), 1, 1));
        }
        let stats = handle.stats();
        assert_eq!(stats.events_queued, 3);
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(handle.queued_events(), 3);
    }

    #[tokio::test]
    async fn test_cardinality_cap_counts_one_warning() {
        let cfg = SurfacerConfig {
            max_targets_per_probe: 2,
            ..config()
        };
        let (actor, handle) = build(&cfg, HtmlRenderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        for target in ["A", "B", "C", "D"] {
            handle.write(event("http", target, 1, 1));
        }
        wait_for(&handle, |s| s.events_accepted + s.targets_dropped == 4).await;
        let stats = handle.stats();
        assert_eq!(stats.events_accepted, 2);
        assert_eq!(stats.targets_dropped, 2);
        assert_eq!(stats.capacity_warnings, 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cached_page_is_reused_without_rerendering() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = Counting {
            calls: Arc::clone(&calls),
        };
        let (actor, handle) = build(&config(), renderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        handle.write(event("http", "a", 4, 3));
        wait_for(&handle, |s| s.events_accepted == 1).await;

        let first = handle.query().await.unwrap();
        handle.write(event("http", "b", 4, 3));
        wait_for(&handle, |s| s.events_accepted == 2).await;
        let second = handle.query().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.stats().cache_hits, 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_zero_cache_age_rerenders() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = Counting {
            calls: Arc::clone(&calls),
        };
        let cfg = SurfacerConfig {
            cache_time_sec: 0,
            ..config()
        };
        let (actor, handle) = build(&cfg, renderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        handle.query().await.unwrap();
        sleep(Duration::from_millis(5)).await;
        handle.query().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_render_failure_does_not_stop_the_actor() {
        let (actor, handle) = build(&config(), Failing);
        let cancel = CancellationToken::new();
        let task = actor.spawn(cancel.clone());

        assert!(matches!(handle.query().await, Err(StatusError::Render(_))));
        handle.write(event("http", "a", 1, 1));
        wait_for(&handle, |s| s.events_accepted == 1).await;
        assert!(matches!(handle.query().await, Err(StatusError::Render(_))));

        let stats = handle.stats();
        assert_eq!(stats.render_failures, 2);
        assert_eq!(stats.queries_served, 2);
        assert!(!task.is_finished());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_query_waits_for_the_actor() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let mut pending = task::spawn(handle.query());
        assert_pending!(pending.poll());

        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());
        for _ in 0..200 {
            if pending.is_woken() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        let page = assert_ready!(pending.poll()).unwrap();
        assert!(page.starts_with(b"<!DOCTYPE html>"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_query_queue_blocks_callers_in_order() {
        let cfg = SurfacerConfig {
            query_queue_size: 1,
            ..config()
        };
        let (actor, handle) = build(&cfg, HtmlRenderer);

        // First query takes the only slot, second waits for room.
        let mut first = task::spawn(handle.query());
        let mut second = task::spawn(handle.query());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_pending!(second.poll());
        assert_eq!(handle.stats(), SurfacerStats::default());

        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());

        let page = poll_until_ready(&mut first).await.unwrap();
        assert!(page.starts_with(b"<!DOCTYPE html>"));
        assert_pending!(second.poll());
        assert_eq!(handle.stats().queries_served, 1);

        let page = poll_until_ready(&mut second).await.unwrap();
        assert!(page.starts_with(b"<!DOCTYPE html>"));
        let stats = handle.stats();
        assert_eq!(stats.queries_served, 2);
        assert_eq!(stats.render_failures, 0);
        assert_eq!(stats.events_dropped, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let cancel = CancellationToken::new();
        let task = actor.spawn(cancel.clone());

        cancel.cancel();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert!(matches!(handle.query().await, Err(StatusError::Stopped)));
        handle.write(event("http", "a", 1, 1));
        assert_eq!(handle.stats().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_the_loop() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let task = actor.spawn(CancellationToken::new());
        drop(handle);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = SurfacerConfig {
            timeseries_size: 0,
            ..Default::default()
        };
        assert!(ProbeStatus::new(&cfg, ProcessInfo::current(), HtmlRenderer).is_err());
    }

    #[tokio::test]
    async fn test_handler_methods() {
        let (actor, handle) = build(&config(), HtmlRenderer);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());
        let mut router = Router::new();
        handle.register(&mut router).unwrap();

        let ok = router.dispatch(Request::new("GET", "/probestatus")).await;
        assert_eq!(ok.status, 200);
        assert!(ok.body.starts_with(b"<!DOCTYPE html>"));

        let post = router.dispatch(Request::new("POST", "/probestatus")).await;
        assert_eq!(post.status, 405);
        assert!(post.headers.contains(&("Allow", "GET".to_string())));

        assert!(handle.register(&mut router).is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_handler_render_failure_is_empty_500() {
        let (actor, handle) = build(&config(), Failing);
        let cancel = CancellationToken::new();
        let _task = actor.spawn(cancel.clone());
        let mut router = Router::new();
        handle.register(&mut router).unwrap();

        let resp = router.dispatch(Request::new("GET", "/probestatus")).await;
        assert_eq!(resp.status, 500);
        assert!(resp.body.is_empty());
        cancel.cancel();
    }
}
