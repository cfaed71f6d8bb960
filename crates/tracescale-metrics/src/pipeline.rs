//! Pipeline counters with a periodic log report.
//!
//! Counters are atomics; trace latencies sit behind a mutex until the next
//! report drains them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::stats;

/// Which way a scaling decision went, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    ScaleUp,
    ScaleDown,
    NoAction,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    traces_processed: AtomicU64,
    traces_dropped: AtomicU64,
    fetch_failures: AtomicU64,
    scale_up: AtomicU64,
    scale_down: AtomicU64,
    no_action: AtomicU64,
    trace_latencies: Mutex<Vec<f64>>,
}

/// Counters accumulated since the previous report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub traces_processed: u64,
    pub traces_dropped: u64,
    pub fetch_failures: u64,
    pub scale_up: u64,
    pub scale_down: u64,
    pub no_action: u64,
    pub average_trace_latency_ms: f64,
    pub p75_trace_latency_ms: f64,
    pub p90_trace_latency_ms: f64,
    pub p95_trace_latency_ms: f64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trace was built and tracked; `latency_ms` is its total span duration.
    pub async fn record_trace(&self, latency_ms: f64) {
        self.traces_processed.fetch_add(1, Ordering::Relaxed);
        self.trace_latencies.lock().await.push(latency_ms);
    }

    /// A trace was rejected as malformed.
    pub fn record_dropped(&self) {
        self.traces_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, kind: DecisionKind) {
        let counter = match kind {
            DecisionKind::ScaleUp => &self.scale_up,
            DecisionKind::ScaleDown => &self.scale_down,
            DecisionKind::NoAction => &self.no_action,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traces_processed(&self) -> u64 {
        self.traces_processed.load(Ordering::Relaxed)
    }

    pub fn traces_dropped(&self) -> u64 {
        self.traces_dropped.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    /// Read all counters and reset them for the next interval.
    pub async fn snapshot_and_reset(&self) -> PipelineSnapshot {
        let latencies = std::mem::take(&mut *self.trace_latencies.lock().await);
        let pct = |q| stats::percentile(&latencies, q).unwrap_or(0.0);

        PipelineSnapshot {
            traces_processed: self.traces_processed.swap(0, Ordering::Relaxed),
            traces_dropped: self.traces_dropped.swap(0, Ordering::Relaxed),
            fetch_failures: self.fetch_failures.swap(0, Ordering::Relaxed),
            scale_up: self.scale_up.swap(0, Ordering::Relaxed),
            scale_down: self.scale_down.swap(0, Ordering::Relaxed),
            no_action: self.no_action.swap(0, Ordering::Relaxed),
            average_trace_latency_ms: stats::mean(&latencies).unwrap_or(0.0),
            p75_trace_latency_ms: pct(75.0),
            p90_trace_latency_ms: pct(90.0),
            p95_trace_latency_ms: pct(95.0),
        }
    }
}

/// Logs a [`PipelineSnapshot`] every interval until shutdown.
pub struct StatsReporter {
    stats: Arc<PipelineStats>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(stats: Arc<PipelineStats>, interval: Duration) -> Self {
        Self { stats, interval }
    }

    /// Log and reset the current counters.
    pub async fn report_once(&self) -> PipelineSnapshot {
        let snap = self.stats.snapshot_and_reset().await;
        info!(
            traces_processed = snap.traces_processed,
            traces_dropped = snap.traces_dropped,
            fetch_failures = snap.fetch_failures,
            scale_up = snap.scale_up,
            scale_down = snap.scale_down,
            no_action = snap.no_action,
            avg_ms = format_args!("{:.2}", snap.average_trace_latency_ms),
            p75_ms = format_args!("{:.2}", snap.p75_trace_latency_ms),
            p90_ms = format_args!("{:.2}", snap.p90_trace_latency_ms),
            p95_ms = format_args!("{:.2}", snap.p95_trace_latency_ms),
            "pipeline report"
        );
        snap
    }

    /// Report every interval until shutdown. Counters accumulated after the
    /// last tick are left for the caller's closing [`StatsReporter::report_once`].
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "stats reporter started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.report_once().await;
                }
                _ = shutdown.changed() => {
                    info!("stats reporter shutting down");
                    break;
                }
            }
        }
    }
}
