//! Rolling latency windows per service and per (service, operation).
//!
//! The service window holds one entry per processed trace (the summed
//! duration of that service's spans); the operation window holds one entry
//! per span. All-time counters survive window eviction.

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracescale_model::Trace;

/// Default rolling window capacity.
pub const DEFAULT_WINDOW_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySample {
    pub latency_ms: f64,
    pub timestamp_unix_nano: u64,
}

/// Fixed-capacity FIFO of samples plus unbounded totals.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<LatencySample>,
    count: u64,
    total_duration_ms: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            count: 0,
            total_duration_ms: 0.0,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: LatencySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.count += 1;
        self.total_duration_ms += sample.latency_ms;
    }

    /// Latencies oldest to newest.
    pub fn latencies(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.latency_ms).collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = &LatencySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples ever pushed, including evicted ones.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.total_duration_ms
    }
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    window: RollingWindow,
    operations: BTreeMap<String, RollingWindow>,
}

/// Per-service and per-operation rolling windows.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    window_size: usize,
    services: BTreeMap<String, ServiceEntry>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl LatencyTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            services: BTreeMap::new(),
        }
    }

    fn entry(&mut self, service: &str) -> &mut ServiceEntry {
        let window_size = self.window_size;
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceEntry {
                window: RollingWindow::new(window_size),
                operations: BTreeMap::new(),
            })
    }

    /// Record one span-level sample for `(service, operation)`.
    pub fn record_operation(
        &mut self,
        service: &str,
        operation: &str,
        start_time_unix_nano: u64,
        latency_ms: f64,
    ) {
        let window_size = self.window_size;
        self.entry(service)
            .operations
            .entry(operation.to_string())
            .or_insert_with(|| RollingWindow::new(window_size))
            .push(LatencySample {
                latency_ms,
                timestamp_unix_nano: start_time_unix_nano,
            });
    }

    /// Record one trace-level sample for `service`, stamped with the current time.
    pub fn record_service(&mut self, service: &str, latency_ms: f64) {
        self.entry(service).window.push(LatencySample {
            latency_ms,
            timestamp_unix_nano: now_unix_nano(),
        });
    }

    /// Record every span of a trace, then one summed sample per service.
    pub fn track(&mut self, trace: &Trace) {
        for span in trace.spans() {
            self.record_operation(
                &span.service_name,
                &span.operation_name,
                span.start_time_unix_nano,
                span.duration_ms(),
            );
        }
        for (service, total) in trace.service_durations_ms() {
            self.record_service(service, total);
        }
    }

    pub fn window(&self, service: &str, operation: Option<&str>) -> Option<&RollingWindow> {
        let entry = self.services.get(service)?;
        match operation {
            Some(op) => entry.operations.get(op),
            None => Some(&entry.window),
        }
    }

    /// Windowed latencies oldest to newest; empty for unknown keys.
    pub fn latencies(&self, service: &str, operation: Option<&str>) -> Vec<f64> {
        self.window(service, operation)
            .map(RollingWindow::latencies)
            .unwrap_or_default()
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn operation_names(&self, service: &str) -> Vec<&str> {
        self.services
            .get(service)
            .map(|e| e.operations.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, service: &str, operation: Option<&str>) -> u64 {
        self.window(service, operation).map_or(0, RollingWindow::count)
    }

    pub fn total_duration_ms(&self, service: &str, operation: Option<&str>) -> f64 {
        self.window(service, operation)
            .map_or(0.0, RollingWindow::total_duration_ms)
    }

    pub fn window_len(&self, service: &str, operation: Option<&str>) -> usize {
        self.window(service, operation).map_or(0, RollingWindow::len)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracescale_model::{Attributes, Span};

    fn span(id: &str, parent: Option<&str>, service: &str, op: &str, ms: u64) -> Span {
        Span {
            trace_id: "t".into(),
            span_id: id.into(),
            parent_span_id: parent.map(str::to_string),
            service_name: service.into(),
            operation_name: op.into(),
            start_time_unix_nano: 1_000,
            end_time_unix_nano: 1_000 + ms * 1_000_000,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn track_records_spans_and_service_sums() {
        let trace = Trace::build(
            "t",
            vec![
                span("a", None, "frontend", "GET /", 30),
                span("b", Some("a"), "api", "list", 10),
                span("c", Some("b"), "api", "query", 5),
            ],
        )
        .unwrap()
        .trace;

        let mut tracker = LatencyTracker::new(25);
        tracker.track(&trace);
        tracker.track(&trace);

        assert_eq!(tracker.latencies("api", None), vec![15.0, 15.0]);
        assert_eq!(tracker.latencies("api", Some("list")), vec![10.0, 10.0]);
        assert_eq!(tracker.operation_names("api"), vec!["list", "query"]);
        assert_eq!(tracker.service_names(), vec!["api", "frontend"]);
        assert_eq!(tracker.count("frontend", None), 2);
        assert_eq!(tracker.total_duration_ms("api", Some("query")), 10.0);
        assert!(tracker.latencies("missing", None).is_empty());
    }

    #[test]
    fn counters_survive_eviction() {
        let mut tracker = LatencyTracker::new(3);
        for i in 0..10 {
            tracker.record_operation("svc", "op", i, i as f64);
        }
        assert_eq!(tracker.latencies("svc", Some("op")), vec![7.0, 8.0, 9.0]);
        assert_eq!(tracker.count("svc", Some("op")), 10);
        assert_eq!(tracker.total_duration_ms("svc", Some("op")), 45.0);
        assert_eq!(tracker.window_len("svc", Some("op")), 3);
    }

    proptest! {
        #[test]
        fn window_is_bounded_fifo(
            capacity in 1usize..40,
            values in prop::collection::vec(0.0f64..10_000.0, 0..200),
        ) {
            let mut window = RollingWindow::new(capacity);
            for (i, v) in values.iter().enumerate() {
                window.push(LatencySample { latency_ms: *v, timestamp_unix_nano: i as u64 });
                prop_assert!(window.len() <= capacity);
            }
            let keep = values.len().min(capacity);
            prop_assert_eq!(window.latencies(), values[values.len() - keep..].to_vec());
            prop_assert_eq!(window.count(), values.len() as u64);
        }
    }
}
