//! Latency statistics over a tracker's current windows.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::stats;
use crate::tracker::LatencyTracker;

/// Default EMA span for [`LatencyAnalyzer::trend_ema`].
pub const DEFAULT_EMA_SPAN: usize = 10;

/// Read-only view answering statistics questions about one tracker.
#[derive(Debug, Clone, Copy)]
pub struct LatencyAnalyzer<'a> {
    tracker: &'a LatencyTracker,
    cusum_threshold: f64,
    ema_span: usize,
}

/// Per-service summary logged alongside a scaling decision.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceLatencyReport {
    pub service: String,
    pub window_len: usize,
    pub average_ms: Option<f64>,
    pub p75_ms: Option<f64>,
    pub trend_linear: f64,
    pub trend_cusum: f64,
    pub trend_ema: f64,
    pub average_total_ms: Option<f64>,
    pub operation_p75_ms: BTreeMap<String, Option<f64>>,
}

impl<'a> LatencyAnalyzer<'a> {
    pub fn new(tracker: &'a LatencyTracker) -> Self {
        Self {
            tracker,
            cusum_threshold: 0.0,
            ema_span: DEFAULT_EMA_SPAN,
        }
    }

    pub fn with_cusum_threshold(mut self, threshold: f64) -> Self {
        self.cusum_threshold = threshold;
        self
    }

    pub fn with_ema_span(mut self, span: usize) -> Self {
        self.ema_span = span.max(1);
        self
    }

    pub fn latencies(&self, service: &str, operation: Option<&str>) -> Vec<f64> {
        self.tracker.latencies(service, operation)
    }

    pub fn average(&self, service: &str, operation: Option<&str>) -> Option<f64> {
        stats::mean(&self.latencies(service, operation))
    }

    pub fn p75(&self, service: &str, operation: Option<&str>) -> Option<f64> {
        stats::percentile(&self.latencies(service, operation), 75.0)
    }

    /// Least-squares slope across the window; 0 with fewer than two samples.
    pub fn trend_linear(&self, service: &str, operation: Option<&str>) -> f64 {
        stats::linear_slope(&self.latencies(service, operation))
    }

    /// Final cumulative deviation from the window mean, divided by the
    /// window length, when its magnitude exceeds the threshold; else 0.
    pub fn trend_cusum(&self, service: &str, operation: Option<&str>) -> f64 {
        let latencies = self.latencies(service, operation);
        let Some(mean) = stats::mean(&latencies) else {
            return 0.0;
        };
        let last = stats::cumsum_deviation(&latencies, mean)
            .last()
            .copied()
            .unwrap_or(0.0);
        if last.abs() > self.cusum_threshold {
            last / latencies.len() as f64
        } else {
            0.0
        }
    }

    /// Last EMA value minus the EMA `span - 1` samples earlier; 0 when the
    /// window is shorter than the span.
    pub fn trend_ema(&self, service: &str, operation: Option<&str>) -> f64 {
        let latencies = self.latencies(service, operation);
        if latencies.len() < self.ema_span {
            return 0.0;
        }
        let ema = stats::ewm(&latencies, self.ema_span);
        ema[ema.len() - 1] - ema[ema.len() - self.ema_span]
    }

    /// All-time mean from the unbounded counters.
    pub fn average_total_latency(&self, service: &str, operation: Option<&str>) -> Option<f64> {
        let count = self.tracker.count(service, operation);
        if count == 0 {
            return None;
        }
        Some(self.tracker.total_duration_ms(service, operation) / count as f64)
    }

    fn per_operation<T>(&self, service: &str, f: impl Fn(&str) -> T) -> BTreeMap<String, T> {
        self.tracker
            .operation_names(service)
            .into_iter()
            .map(|op| (op.to_string(), f(op)))
            .collect()
    }

    pub fn operation_averages(&self, service: &str) -> BTreeMap<String, Option<f64>> {
        self.per_operation(service, |op| self.average(service, Some(op)))
    }

    pub fn operation_p75s(&self, service: &str) -> BTreeMap<String, Option<f64>> {
        self.per_operation(service, |op| self.p75(service, Some(op)))
    }

    pub fn operation_trends(&self, service: &str) -> BTreeMap<String, f64> {
        self.per_operation(service, |op| self.trend_linear(service, Some(op)))
    }

    pub fn operation_trends_cusum(&self, service: &str) -> BTreeMap<String, f64> {
        self.per_operation(service, |op| self.trend_cusum(service, Some(op)))
    }

    pub fn operation_trends_ema(&self, service: &str) -> BTreeMap<String, f64> {
        self.per_operation(service, |op| self.trend_ema(service, Some(op)))
    }

    pub fn report(&self, service: &str) -> ServiceLatencyReport {
        ServiceLatencyReport {
            service: service.to_string(),
            window_len: self.tracker.window_len(service, None),
            average_ms: self.average(service, None),
            p75_ms: self.p75(service, None),
            trend_linear: self.trend_linear(service, None),
            trend_cusum: self.trend_cusum(service, None),
            trend_ema: self.trend_ema(service, None),
            average_total_ms: self.average_total_latency(service, None),
            operation_p75_ms: self.operation_p75s(service),
        }
    }
}
