//! Pluggable scaling policies.

use std::sync::Arc;

use tracescale_config::{ConfigError, ConfigStore};
use tracescale_metrics::LatencyAnalyzer;
use tracing::{debug, warn};

use crate::detector::{Detection, HybridDetector, ScaleAction};

/// Default minimum window length before the static policy decides.
pub const DEFAULT_STATIC_MIN_SAMPLES: usize = 10;

/// Decides a scaling action for one service from its current window.
pub trait ScalingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, service: &str, analyzer: &LatencyAnalyzer<'_>) -> Detection;
}

/// Adaptive bounds from the service's own recent history.
#[derive(Debug, Clone, Default)]
pub struct HybridPolicy {
    detector: HybridDetector,
}

impl HybridPolicy {
    pub fn new(detector: HybridDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &HybridDetector {
        &self.detector
    }
}

impl ScalingPolicy for HybridPolicy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn evaluate(&self, service: &str, analyzer: &LatencyAnalyzer<'_>) -> Detection {
        let latencies = analyzer.latencies(service, None);
        if latencies.is_empty() {
            warn!(%service, "no latency data available");
            return Detection::insufficient(0, self.detector.span_threshold);
        }
        self.detector.detect(&latencies)
    }
}

/// Fixed per-deployment bounds from the configuration store, compared
/// against the window average.
pub struct StaticThresholdPolicy {
    config: Arc<dyn ConfigStore>,
    min_samples: usize,
}

impl StaticThresholdPolicy {
    pub fn new(config: Arc<dyn ConfigStore>, min_samples: usize) -> Self {
        Self {
            config,
            min_samples,
        }
    }
}

impl ScalingPolicy for StaticThresholdPolicy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn evaluate(&self, service: &str, analyzer: &LatencyAnalyzer<'_>) -> Detection {
        let samples = analyzer.latencies(service, None).len();

        if !self.config.all_resources().iter().any(|r| r == service) {
            debug!(%service, "service not configured for static scaling");
            return Detection::insufficient(samples, None);
        }
        if samples < self.min_samples {
            return Detection::insufficient(samples, None);
        }

        let threshold = match self.config.latency_threshold(service) {
            Ok(t) => t,
            Err(ConfigError::ResourceNotFound(_)) => {
                warn!(%service, "no latency threshold defined");
                return Detection::insufficient(samples, None);
            }
            Err(e) => {
                warn!(%service, error = %e, "latency threshold unusable");
                return Detection::insufficient(samples, None);
            }
        };

        let Some(average) = analyzer.average(service, None) else {
            return Detection::insufficient(samples, None);
        };
        let upper = threshold.upper_ms();
        let lower = threshold.lower_ms();
        let action = if average > upper {
            ScaleAction::ScaleUp
        } else if average < lower {
            ScaleAction::ScaleDown
        } else {
            ScaleAction::NoAction
        };

        Detection {
            action,
            upper_bound: upper,
            lower_bound: lower,
            value: average,
            samples,
            span_threshold: None,
            triggered_by_bounds: action != ScaleAction::NoAction,
            cusum: None,
        }
    }
}
