//! tracescale-metrics — rolling latency windows, analysis, and pipeline counters.
//!
//! The [`LatencyTracker`] is mutated by the trace processor and read by
//! decision policies through a [`LatencyAnalyzer`]. Wrap it in
//! [`SharedTracker`] when readers and the writer live on different tasks.

pub mod analyzer;
pub mod pipeline;
pub mod stats;
pub mod tracker;

pub use analyzer::{LatencyAnalyzer, ServiceLatencyReport};
pub use pipeline::{DecisionKind, PipelineSnapshot, PipelineStats, StatsReporter};
pub use tracker::{DEFAULT_WINDOW_SIZE, LatencySample, LatencyTracker, RollingWindow};

/// Tracker shared between the ingest path and decision readers.
pub type SharedTracker = std::sync::Arc<tokio::sync::RwLock<LatencyTracker>>;
