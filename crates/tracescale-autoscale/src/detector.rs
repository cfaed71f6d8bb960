//! Hybrid EWMA/CUSUM latency detector.
//!
//! ```text
//! span      = span_threshold  or  max(1, len / 3)
//! sigma     = std(last `span` samples)
//! center    = p75(ewm(window, span))
//! upper     = center + k * sigma
//! lower     = max(1, center - k * sigma)
//! value     = p75(window)
//! cusum     = sum(window - center)
//!
//! value > upper  => scale up
//! value < lower  => scale down
//! ```
//!
//! CUSUM is always reported. It only gates the decision when
//! `cusum_gating` is enabled, in which case a cumulative drift beyond
//! `±cusum_threshold` also triggers the matching action.

use serde::Serialize;
use tracescale_metrics::stats;

/// Default multiplier `k` applied to the recent standard deviation.
pub const DEFAULT_EWMA_MULTIPLIER: f64 = 1.5;

/// Multiplier applied to the recent standard deviation for the default CUSUM threshold.
const CUSUM_SIGMA_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl ScaleAction {
    /// Replica change this action requests.
    pub fn replica_delta(&self) -> i64 {
        match self {
            ScaleAction::ScaleUp => 1,
            ScaleAction::ScaleDown => -1,
            ScaleAction::NoAction => 0,
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::NoAction => "no_action",
        })
    }
}

/// CUSUM diagnostics attached to a hybrid decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CusumReport {
    /// Final cumulative deviation from the EWMA center.
    pub value: f64,
    pub threshold: f64,
    /// `|value| > threshold`.
    pub exceeded: bool,
}

/// Outcome of one policy evaluation, shared by every policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub action: ScaleAction,
    pub upper_bound: f64,
    pub lower_bound: f64,
    /// The statistic compared against the bounds (NaN without data).
    pub value: f64,
    /// Number of window samples that fed the decision.
    pub samples: usize,
    pub span_threshold: Option<usize>,
    /// True when the bounds comparison produced the action.
    pub triggered_by_bounds: bool,
    pub cusum: Option<CusumReport>,
}

impl Detection {
    /// No decision possible; bounds are open and the value undefined.
    pub fn insufficient(samples: usize, span_threshold: Option<usize>) -> Self {
        Self {
            action: ScaleAction::NoAction,
            upper_bound: f64::INFINITY,
            lower_bound: f64::NEG_INFINITY,
            value: f64::NAN,
            samples,
            span_threshold,
            triggered_by_bounds: false,
            cusum: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridDetector {
    pub ewma_multiplier: f64,
    /// Fixed span; `None` means one third of the window (at least 1).
    pub span_threshold: Option<usize>,
    /// Fixed CUSUM threshold; `None` means 1.5 × recent standard deviation.
    pub cusum_threshold: Option<f64>,
    pub cusum_gating: bool,
}

impl Default for HybridDetector {
    fn default() -> Self {
        Self {
            ewma_multiplier: DEFAULT_EWMA_MULTIPLIER,
            span_threshold: None,
            cusum_threshold: None,
            cusum_gating: false,
        }
    }
}

impl HybridDetector {
    pub fn new(ewma_multiplier: f64) -> Self {
        Self {
            ewma_multiplier,
            ..Self::default()
        }
    }

    pub fn with_span_threshold(mut self, span: usize) -> Self {
        self.span_threshold = Some(span.max(1));
        self
    }

    pub fn with_cusum_threshold(mut self, threshold: f64) -> Self {
        self.cusum_threshold = Some(threshold);
        self
    }

    pub fn with_cusum_gating(mut self, enabled: bool) -> Self {
        self.cusum_gating = enabled;
        self
    }

    /// Evaluate a window of latencies ordered oldest to newest.
    pub fn detect(&self, latencies: &[f64]) -> Detection {
        let span = self
            .span_threshold
            .unwrap_or_else(|| (latencies.len() / 3).max(1));

        if latencies.is_empty() || latencies.len() < span {
            return Detection::insufficient(latencies.len(), Some(span));
        }

        let recent = &latencies[latencies.len() - span..];
        let sigma = stats::std_dev(recent);
        let cusum_threshold = self.cusum_threshold.unwrap_or(CUSUM_SIGMA_FACTOR * sigma);

        let ewma = stats::ewm(latencies, span);
        let center = stats::percentile(&ewma, 75.0).unwrap_or(f64::NAN);
        let upper_bound = center + self.ewma_multiplier * sigma;
        let lower_bound = (center - self.ewma_multiplier * sigma).max(1.0);
        let value = stats::percentile(latencies, 75.0).unwrap_or(f64::NAN);

        let cusum_last = stats::cumsum_deviation(latencies, center)
            .last()
            .copied()
            .unwrap_or(0.0);
        let cusum = CusumReport {
            value: cusum_last,
            threshold: cusum_threshold,
            exceeded: cusum_last.abs() > cusum_threshold,
        };

        let above = value > upper_bound;
        let below = value < lower_bound;
        let (action, triggered_by_bounds) = if above {
            (ScaleAction::ScaleUp, true)
        } else if below {
            (ScaleAction::ScaleDown, true)
        } else if self.cusum_gating && cusum_last > cusum_threshold {
            (ScaleAction::ScaleUp, false)
        } else if self.cusum_gating && cusum_last < -cusum_threshold {
            (ScaleAction::ScaleDown, false)
        } else {
            (ScaleAction::NoAction, false)
        };

        Detection {
            action,
            upper_bound,
            lower_bound,
            value: if action != ScaleAction::NoAction && !triggered_by_bounds {
                cusum_last
            } else {
                value
            },
            samples: latencies.len(),
            span_threshold: Some(span),
            triggered_by_bounds,
            cusum: Some(cusum),
        }
    }
}
