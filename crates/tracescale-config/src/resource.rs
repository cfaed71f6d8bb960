//! `LatencyBasedAutoScaler` resource documents.
//!
//! ```yaml
//! apiVersion: scale.io/v1
//! kind: LatencyBasedAutoScaler
//! metadata:
//!   name: frontend-scaler
//! spec:
//!   target:
//!     deploymentName: frontend
//!   latencyThreshold:
//!     upperBound: 200ms
//!     lowerBound: 50ms
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

pub const LATENCY_SCALER_KIND: &str = "LatencyBasedAutoScaler";

static THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([a-zA-Zµ]+)\s*$").expect("threshold pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalerResource {
    #[serde(default)]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub metadata: Option<ResourceMetadata>,
    pub spec: ScalerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalerSpec {
    pub target: ScaleTarget,
    pub latency_threshold: ThresholdSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTarget {
    #[serde(default)]
    pub deployment_name: String,
}

/// Raw bound strings as written in the document, e.g. `"200ms"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSpec {
    pub upper_bound: String,
    pub lower_bound: String,
}

impl ScalerResource {
    pub fn deployment_name(&self) -> &str {
        &self.spec.target.deployment_name
    }

    pub fn latency_threshold(&self) -> ConfigResult<LatencyThreshold> {
        Ok(LatencyThreshold {
            upper: LatencyBound::parse(&self.spec.latency_threshold.upper_bound)?,
            lower: LatencyBound::parse(&self.spec.latency_threshold.lower_bound)?,
        })
    }
}

/// A bound split into its numeric value and unit suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyBound {
    pub value: f64,
    pub units: String,
}

impl LatencyBound {
    pub fn parse(s: &str) -> ConfigResult<Self> {
        let caps = THRESHOLD_RE
            .captures(s)
            .ok_or_else(|| ConfigError::InvalidThreshold(s.to_string()))?;
        let value = caps[1]
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidThreshold(s.to_string()))?;
        let bound = Self {
            value,
            units: caps[2].to_string(),
        };
        bound.unit_scale().ok_or_else(|| ConfigError::InvalidThreshold(s.to_string()))?;
        Ok(bound)
    }

    fn unit_scale(&self) -> Option<f64> {
        match self.units.as_str() {
            "ns" => Some(1e-6),
            "us" | "µs" => Some(1e-3),
            "ms" => Some(1.0),
            "s" => Some(1_000.0),
            "m" => Some(60_000.0),
            _ => None,
        }
    }

    /// The bound in milliseconds.
    pub fn as_millis(&self) -> f64 {
        self.value * self.unit_scale().unwrap_or(1.0)
    }
}

impl std::fmt::Display for LatencyBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.value, self.units)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyThreshold {
    pub upper: LatencyBound,
    pub lower: LatencyBound,
}

impl LatencyThreshold {
    pub fn upper_ms(&self) -> f64 {
        self.upper.as_millis()
    }

    pub fn lower_ms(&self) -> f64 {
        self.lower.as_millis()
    }
}
