//! Trace processing.
//!
//! The ingest side (`process`) fetches each announced trace, builds it,
//! records it in the tracker, and queues it. A single worker drains the
//! queue in FIFO order and runs the decision engine for the services of
//! each trace. The queue is unbounded, so a slow engine shows up as
//! memory growth rather than dropped traces.
//!
//! On shutdown the worker either finishes what is queued
//! ([`DrainPolicy::Drain`]) or stops at once ([`DrainPolicy::Abandon`]).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracescale_backend::{BackendError, TraceBackend};
use tracescale_core::DrainPolicy;
use tracescale_metrics::{PipelineStats, SharedTracker};
use tracescale_model::{Trace, hex_id, parse_spans};
use tracescale_proto::trace::TracesData;

use crate::engine::DecisionEngine;
use crate::error::{ProcessError, ProcessResult};
use crate::source::Notification;

/// Turns notifications into tracked traces and feeds a single decision
/// worker through an unbounded queue.
pub struct TraceProcessor {
    backend: Arc<dyn TraceBackend>,
    tracker: SharedTracker,
    stats: Arc<PipelineStats>,
    engine: Arc<DecisionEngine>,
    fetch_timeout: Duration,
    drain: DrainPolicy,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Trace>>>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Trace>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_launches: AtomicU32,
    cancel: CancellationToken,
}

impl TraceProcessor {
    pub fn new(
        backend: Arc<dyn TraceBackend>,
        tracker: SharedTracker,
        stats: Arc<PipelineStats>,
        engine: Arc<DecisionEngine>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            backend,
            tracker,
            stats,
            engine,
            fetch_timeout: Duration::from_secs(10),
            drain: DrainPolicy::Drain,
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            worker_launches: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Deadline for one backend fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// What [`TraceProcessor::shutdown`] does with traces still queued.
    pub fn with_drain_policy(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    /// How many times the worker has been spawned (at most once).
    pub fn worker_launches(&self) -> u32 {
        self.worker_launches.load(Ordering::SeqCst)
    }

    /// Spawn the queue worker. Later calls do nothing and return `false`.
    pub fn start_worker(&self) -> bool {
        let Some(rx) = self.queue_rx.lock().take() else {
            return false;
        };
        self.worker_launches.fetch_add(1, Ordering::SeqCst);
        info!("starting trace processor worker");

        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(run_worker(engine, rx, cancel));
        *self.worker.lock() = Some(handle);
        true
    }

    /// Handle one notification from the sampler. Returns how many traces
    /// were queued.
    pub async fn process(&self, notification: Notification) -> ProcessResult<usize> {
        match notification {
            Notification::TraceId(trace_id) => {
                self.process_trace_id(&trace_id).await?;
                Ok(1)
            }
            Notification::TraceData(data) => {
                let mut queued = 0;
                for trace_id in distinct_trace_ids(&data) {
                    match self.process_trace_id(&trace_id).await {
                        Ok(()) => queued += 1,
                        Err(ProcessError::QueueClosed) => return Err(ProcessError::QueueClosed),
                        Err(e) => warn!(%trace_id, error = %e, "skipping trace"),
                    }
                }
                Ok(queued)
            }
        }
    }

    /// Fetch, build, track and queue a single trace.
    pub async fn process_trace_id(&self, trace_id: &str) -> ProcessResult<()> {
        debug!(%trace_id, "processing trace");
        let data = match tokio::time::timeout(
            self.fetch_timeout,
            self.backend.get_trace_by_id(trace_id),
        )
        .await
        {
            Ok(Ok(data)) => data,
            Ok(Err(source)) => {
                self.stats.record_fetch_failure();
                return Err(ProcessError::BackendFetch {
                    trace_id: trace_id.to_string(),
                    source,
                });
            }
            Err(_) => {
                self.stats.record_fetch_failure();
                return Err(ProcessError::BackendFetch {
                    trace_id: trace_id.to_string(),
                    source: BackendError::Timeout(self.fetch_timeout),
                });
            }
        };

        let build = match Trace::build(trace_id, parse_spans(&data)) {
            Ok(build) => build,
            Err(e) => {
                self.stats.record_dropped();
                return Err(e.into());
            }
        };
        build.log_findings();
        let trace = build.trace;
        debug!(%trace_id, spans = trace.len(), tree = %trace.render_tree(), "trace built");

        self.tracker.write().await.track(&trace);
        self.stats.record_trace(trace.duration_total_ms()).await;

        let tx = self.queue_tx.lock();
        match tx.as_ref() {
            Some(tx) => tx.send(trace).map_err(|_| ProcessError::QueueClosed),
            None => Err(ProcessError::QueueClosed),
        }
    }

    /// Stop accepting traces and wind the worker down per the drain policy.
    pub async fn shutdown(&self) {
        self.queue_tx.lock().take();
        if self.drain == DrainPolicy::Abandon {
            self.cancel.cancel();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "trace processor worker failed");
            }
        }
        info!(drain = %self.drain, "trace processor stopped");
    }
}

async fn run_worker(
    engine: Arc<DecisionEngine>,
    mut rx: mpsc::UnboundedReceiver<Trace>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let abandoned = rx.len();
                if abandoned > 0 {
                    warn!(abandoned, "abandoning queued traces");
                }
                break;
            }
            next = rx.recv() => {
                let Some(trace) = next else { break };
                engine.analyze_trace(&trace).await;
                debug!(trace_id = %trace.trace_id(), "trace analyzed");
            }
        }
    }
    debug!("trace processor worker exited");
}

/// Distinct hex trace ids in a batch, in first-seen order.
fn distinct_trace_ids(data: &TracesData) -> Vec<String> {
    let mut seen = BTreeSet::new();
    data.resource_spans
        .iter()
        .flat_map(|rs| &rs.scope_spans)
        .flat_map(|ss| &ss.spans)
        .filter_map(|span| hex_id(&span.trace_id))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;
    use tracescale_autoscale::{InMemoryOrchestrator, ScalingActuator};
    use tracescale_backend::InMemoryBackend;
    use tracescale_config::{ConfigStore, YamlConfigStore};
    use tracescale_core::{ModelerConfig, ScalingMode};
    use tracescale_metrics::LatencyTracker;
    use tracescale_proto::trace::{ResourceSpans, ScopeSpans, Span};

    use crate::engine::build_policy;

    fn span(trace: u8, id: u8, parent: Option<u8>, ms: u64) -> Span {
        Span {
            trace_id: vec![trace; 16],
            span_id: vec![id; 8],
            parent_span_id: parent.map(|p| vec![p; 8]).unwrap_or_default(),
            name: format!("op-{id}"),
            start_time_unix_nano: 0,
            end_time_unix_nano: ms * 1_000_000,
            ..Default::default()
        }
    }

    fn data(spans: Vec<Span>) -> TracesData {
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn id(trace: u8) -> String {
        hex::encode([trace; 16])
    }

    fn processor(backend: Arc<InMemoryBackend>) -> TraceProcessor {
        let tracker: SharedTracker = Arc::new(RwLock::new(LatencyTracker::new(25)));
        let stats = Arc::new(PipelineStats::new());
        let store: Arc<dyn ConfigStore> = Arc::new(YamlConfigStore::from_yaml_str("").unwrap());
        let engine = DecisionEngine::new(
            Arc::clone(&tracker),
            build_policy(&ModelerConfig::default(), store),
            ScalingActuator::new(ScalingMode::Observe, Arc::new(InMemoryOrchestrator::new())),
            Arc::clone(&stats),
        );
        TraceProcessor::new(backend, tracker, stats, Arc::new(engine))
    }

    #[tokio::test]
    async fn tracks_and_queues_built_traces() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert(id(1), data(vec![span(1, 1, None, 30), span(1, 2, Some(1), 10)]));
        let processor = processor(backend);

        assert_eq!(processor.process(Notification::TraceId(id(1))).await.unwrap(), 1);
        assert_eq!(processor.stats().traces_processed(), 1);

        let tracker = processor.tracker().read().await;
        assert_eq!(tracker.latencies("unknown_service", None), vec![40.0]);
        assert_eq!(tracker.window_len("unknown_service", Some("op-2")), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_skipped_and_counted() {
        let processor = processor(Arc::new(InMemoryBackend::new()));
        let err = processor.process(Notification::TraceId(id(9))).await.unwrap_err();
        assert!(matches!(err, ProcessError::BackendFetch { .. }));
        assert_eq!(processor.stats().fetch_failures(), 1);
    }

    #[tokio::test]
    async fn rootless_trace_is_dropped() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert(id(2), data(vec![span(2, 2, Some(1), 10)]));
        let processor = processor(backend);

        let err = processor.process(Notification::TraceId(id(2))).await.unwrap_err();
        assert!(matches!(err, ProcessError::MalformedTrace(_)));
        assert_eq!(processor.stats().traces_dropped(), 1);
        assert_eq!(processor.stats().traces_processed(), 0);
    }

    #[tokio::test]
    async fn data_notifications_fetch_each_trace_once() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert(id(1), data(vec![span(1, 1, None, 5)]));
        backend.insert(id(2), data(vec![span(2, 1, None, 5)]));
        let processor = processor(backend);

        let batch = data(vec![
            span(1, 1, None, 5),
            span(1, 2, Some(1), 1),
            span(2, 1, None, 5),
            span(3, 1, None, 5),
        ]);
        // Trace 3 is not in the backend and is skipped.
        assert_eq!(processor.process(Notification::TraceData(batch)).await.unwrap(), 2);
        assert_eq!(processor.stats().fetch_failures(), 1);
    }

    #[tokio::test]
    async fn worker_starts_once_and_drains_on_shutdown() {
        let backend = Arc::new(InMemoryBackend::new());
        for t in 1..=3 {
            backend.insert(id(t), data(vec![span(t, 1, None, 5)]));
        }
        let processor = processor(backend);
        for t in 1..=3 {
            processor.process(Notification::TraceId(id(t))).await.unwrap();
        }

        assert!(processor.start_worker());
        assert!(!processor.start_worker());
        assert_eq!(processor.worker_launches(), 1);

        processor.shutdown().await;
        let snapshot = processor.stats().snapshot_and_reset().await;
        assert_eq!(snapshot.no_action, 3);
        assert!(matches!(
            processor.process(Notification::TraceId(id(1))).await,
            Err(ProcessError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn abandon_skips_queued_traces() {
        let backend = Arc::new(InMemoryBackend::new());
        for t in 1..=3 {
            backend.insert(id(t), data(vec![span(t, 1, None, 5)]));
        }
        let processor = processor(backend).with_drain_policy(DrainPolicy::Abandon);
        for t in 1..=3 {
            processor.process(Notification::TraceId(id(t))).await.unwrap();
        }

        // Cancel before the worker ever polls the queue.
        processor.cancel.cancel();
        assert!(processor.start_worker());
        processor.shutdown().await;

        let snapshot = processor.stats().snapshot_and_reset().await;
        assert_eq!(snapshot.no_action, 0);
    }

    #[test]
    fn distinct_ids_keep_first_seen_order() {
        let batch = data(vec![
            span(2, 1, None, 1),
            span(1, 1, None, 1),
            span(2, 2, Some(1), 1),
        ]);
        assert_eq!(distinct_trace_ids(&batch), vec![id(2), id(1)]);
    }
}
