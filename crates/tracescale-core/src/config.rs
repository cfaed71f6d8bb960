//! tracescale.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a working configuration.
//!
//! ```toml
//! [sampler]
//! listen_address = "0.0.0.0:4317"
//! min_train_count = 20
//! min_score = 0.6
//!
//! [modeler]
//! sampler_channel = "sampler:4317"
//! mode = "observe"
//! policy = "hybrid"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_or;
use crate::types::{DrainPolicy, ErrorPolicy, PolicyKind, ScalingMode, SubscriptionKind};

/// Deepest half-space tree the sampler builds.
pub const MAX_TREE_HEIGHT: usize = 16;

/// A configuration value outside its accepted range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("model.height {height} exceeds the maximum of {max}")]
    TreeHeightTooLarge { height: usize, max: usize },
}

/// Top-level tracescale.toml document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceScaleConfig {
    /// `[sampler]` table.
    pub sampler: SamplerConfig,
    /// `[modeler]` table.
    pub modeler: ModelerConfig,
}

/// Settings for the span sampler process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    /// host:port the gRPC server binds to.
    pub listen_address: String,
    /// Base URL of the tracing backend used for pretraining.
    pub backend_url: String,
    /// Cold-start spans at or above this duration are accepted but not learned.
    pub max_train_duration_ms: f64,
    /// Upper clamp for the duration feature.
    pub max_duration_ms: f64,
    /// Spans per (service, operation) learned before scoring begins.
    pub min_train_count: u64,
    /// Warm spans are accepted only when their score exceeds this.
    pub min_score: f64,
    /// Bit width of each of the service and operation binary codes.
    pub category_feature_length: usize,
    /// Number of traces requested from the backend for pretraining.
    pub train_size: usize,
    /// How far back the pretraining search reaches.
    pub start_delta: String,
    /// Spans dropped unconditionally at startup.
    pub skip_span_count: u64,
    /// Per-subscriber queue depth of the multicast stream.
    pub subscriber_buffer: usize,
    /// Skip backend pretraining entirely.
    pub skip_pretraining: bool,
    /// `[sampler.model]` table: half-space trees parameters.
    pub model: ModelConfig,
    /// First delay between failed pretraining attempts.
    pub pretrain_backoff_min: String,
    /// Ceiling the doubling pretraining delay stops at.
    pub pretrain_backoff_max: String,
}

/// Half-space trees ensemble parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// Depth of every tree; a tree holds `2^(height+1) - 1` nodes.
    /// At most [`MAX_TREE_HEIGHT`].
    pub height: usize,
    /// Observations per mass window.
    pub window_size: u64,
    /// Seed for the random split points.
    pub seed: u64,
}

/// Settings for the modeler (consumer, processor, decision engine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelerConfig {
    /// host:port of the sampler's gRPC server.
    pub sampler_channel: String,
    /// Base URL of the tracing backend.
    pub backend_url: String,
    /// Directory holding LatencyBasedAutoScaler YAML documents.
    pub config_path: String,
    /// Subscribe to trace ids or to full trace batches.
    pub subscription: SubscriptionKind,
    /// Whether terminal stream errors stop the consumer or are retried.
    pub error_policy: ErrorPolicy,
    /// Fixed wait before resubscribing after a lost stream.
    pub reconnect_delay: String,
    /// Deadline for one trace fetch from the backend.
    pub fetch_timeout: String,
    /// Rolling window capacity per service and per operation.
    pub window_size: usize,
    /// Log decisions only, or apply them through the orchestrator.
    pub mode: ScalingMode,
    /// Adaptive hybrid detector or fixed configured bounds.
    pub policy: PolicyKind,
    /// Finish or drop queued traces on shutdown.
    pub drain: DrainPolicy,
    /// Multiplier `k` on the recent standard deviation for the bounds.
    pub ewma_multiplier: f64,
    /// Let the CUSUM statistic trigger decisions on its own.
    pub cusum_gating: bool,
    /// Fixed span threshold; unset means one third of the window.
    pub span_threshold: Option<usize>,
    /// Fixed CUSUM threshold; unset means 1.5 standard deviations.
    pub cusum_threshold: Option<f64>,
    /// Window entries the static policy needs before deciding.
    pub static_min_samples: usize,
    /// How often the scaler spec directory is checked for changes.
    pub config_poll_interval: String,
    /// How often pipeline statistics are logged and reset.
    pub report_interval: String,
    /// Minimum time between two scale-ups of one service.
    pub scale_up_cooldown: String,
    /// Minimum time between two scale-downs of one service.
    pub scale_down_cooldown: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:4317".to_string(),
            backend_url: "http://tempo:3200".to_string(),
            max_train_duration_ms: 1000.0,
            max_duration_ms: 5000.0,
            min_train_count: 20,
            min_score: 0.60,
            category_feature_length: 8,
            train_size: 2000,
            start_delta: "86400s".to_string(),
            skip_span_count: 20_000,
            subscriber_buffer: 1024,
            skip_pretraining: false,
            model: ModelConfig::default(),
            pretrain_backoff_min: "5s".to_string(),
            pretrain_backoff_max: "60s".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_trees: 10,
            height: 8,
            window_size: 250,
            seed: 42,
        }
    }
}

impl Default for ModelerConfig {
    fn default() -> Self {
        Self {
            sampler_channel: "sampler:4317".to_string(),
            backend_url: "http://tempo:3200".to_string(),
            config_path: "/app/config/specs".to_string(),
            subscription: SubscriptionKind::Ids,
            error_policy: ErrorPolicy::FailStop,
            reconnect_delay: "5s".to_string(),
            fetch_timeout: "10s".to_string(),
            window_size: 25,
            mode: ScalingMode::Observe,
            policy: PolicyKind::Hybrid,
            drain: DrainPolicy::Drain,
            ewma_multiplier: 1.5,
            cusum_gating: false,
            span_threshold: None,
            cusum_threshold: None,
            static_min_samples: 10,
            config_poll_interval: "5s".to_string(),
            report_interval: "60s".to_string(),
            scale_up_cooldown: "30s".to_string(),
            scale_down_cooldown: "60s".to_string(),
        }
    }
}

impl ModelConfig {
    /// Reject parameters the model cannot be built with.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.height > MAX_TREE_HEIGHT {
            return Err(ConfigValidationError::TreeHeightTooLarge {
                height: self.height,
                max: MAX_TREE_HEIGHT,
            });
        }
        Ok(())
    }
}

impl SamplerConfig {
    /// How far back the pretraining search reaches (default 24h).
    pub fn start_delta(&self) -> Duration {
        parse_or(&self.start_delta, Duration::from_secs(86_400))
    }

    /// `(first, ceiling)` pretraining retry delays.
    pub fn pretrain_backoff(&self) -> (Duration, Duration) {
        (
            parse_or(&self.pretrain_backoff_min, Duration::from_secs(5)),
            parse_or(&self.pretrain_backoff_max, Duration::from_secs(60)),
        )
    }
}

impl ModelerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        parse_or(&self.reconnect_delay, Duration::from_secs(5))
    }

    pub fn fetch_timeout(&self) -> Duration {
        parse_or(&self.fetch_timeout, Duration::from_secs(10))
    }

    pub fn config_poll_interval(&self) -> Duration {
        parse_or(&self.config_poll_interval, Duration::from_secs(5))
    }

    pub fn report_interval(&self) -> Duration {
        parse_or(&self.report_interval, Duration::from_secs(60))
    }

    pub fn scale_up_cooldown(&self) -> Duration {
        parse_or(&self.scale_up_cooldown, Duration::from_secs(30))
    }

    pub fn scale_down_cooldown(&self) -> Duration {
        parse_or(&self.scale_down_cooldown, Duration::from_secs(60))
    }
}

impl TraceScaleConfig {
    /// Load and validate a tracescale.toml file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TraceScaleConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.sampler.model.validate()
    }

    /// Render the effective configuration, defaults included.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
