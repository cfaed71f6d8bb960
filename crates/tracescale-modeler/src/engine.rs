//! Per-service scaling decisions.
//!
//! For every service present in a dequeued trace the engine evaluates the
//! configured policy against the shared tracker, counts the outcome, logs
//! it, and hands it to the actuator.

use std::sync::Arc;

use tracing::{debug, info};

use tracescale_autoscale::{
    Actuation, Detection, HybridDetector, HybridPolicy, ScaleAction, ScalingActuator,
    ScalingPolicy, StaticThresholdPolicy,
};
use tracescale_config::ConfigStore;
use tracescale_core::{ModelerConfig, PolicyKind};
use tracescale_metrics::{DecisionKind, LatencyAnalyzer, PipelineStats, SharedTracker};
use tracescale_model::Trace;

/// Outcome for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDecision {
    pub service: String,
    pub detection: Detection,
    pub actuation: Actuation,
}

/// Build the policy selected by configuration.
pub fn build_policy(config: &ModelerConfig, store: Arc<dyn ConfigStore>) -> Arc<dyn ScalingPolicy> {
    match config.policy {
        PolicyKind::Hybrid => {
            let mut detector =
                HybridDetector::new(config.ewma_multiplier).with_cusum_gating(config.cusum_gating);
            if let Some(span) = config.span_threshold {
                detector = detector.with_span_threshold(span);
            }
            if let Some(threshold) = config.cusum_threshold {
                detector = detector.with_cusum_threshold(threshold);
            }
            Arc::new(HybridPolicy::new(detector))
        }
        PolicyKind::Static => Arc::new(StaticThresholdPolicy::new(store, config.static_min_samples)),
    }
}

/// Runs the scaling policy against tracked latency and hands the
/// result to the actuator.
pub struct DecisionEngine {
    tracker: SharedTracker,
    policy: Arc<dyn ScalingPolicy>,
    actuator: ScalingActuator,
    stats: Arc<PipelineStats>,
}

impl DecisionEngine {
    pub fn new(
        tracker: SharedTracker,
        policy: Arc<dyn ScalingPolicy>,
        actuator: ScalingActuator,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            tracker,
            policy,
            actuator,
            stats,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Decide for each distinct service in the trace.
    pub async fn analyze_trace(&self, trace: &Trace) -> Vec<ServiceDecision> {
        let services: Vec<String> = trace.service_names().into_iter().map(str::to_string).collect();
        let mut decisions = Vec::with_capacity(services.len());
        for service in services {
            decisions.push(self.analyze_service(&service).await);
        }
        decisions
    }

    /// Decide for one service from its current latency window.
    pub async fn analyze_service(&self, service: &str) -> ServiceDecision {
        let (detection, report) = {
            let tracker = self.tracker.read().await;
            let analyzer = LatencyAnalyzer::new(&tracker);
            let detection = self.policy.evaluate(service, &analyzer);
            let report = (detection.action != ScaleAction::NoAction).then(|| analyzer.report(service));
            (detection, report)
        };

        self.stats.record_decision(match detection.action {
            ScaleAction::ScaleUp => DecisionKind::ScaleUp,
            ScaleAction::ScaleDown => DecisionKind::ScaleDown,
            ScaleAction::NoAction => DecisionKind::NoAction,
        });

        let cusum_value = detection.cusum.map(|c| c.value);
        let cusum_exceeded = detection.cusum.is_some_and(|c| c.exceeded);
        if detection.action == ScaleAction::NoAction {
            debug!(
                %service,
                policy = self.policy.name(),
                upper = detection.upper_bound,
                lower = detection.lower_bound,
                value = detection.value,
                samples = detection.samples,
                "no action"
            );
        } else {
            info!(
                %service,
                action = %detection.action,
                policy = self.policy.name(),
                upper = detection.upper_bound,
                lower = detection.lower_bound,
                value = detection.value,
                span_threshold = ?detection.span_threshold,
                by_bounds = detection.triggered_by_bounds,
                cusum = ?cusum_value,
                cusum_exceeded,
                "scaling decision"
            );
            if let Some(report) = &report {
                debug!(%service, ?report, "service latency report");
            }
        }

        let actuation = self.actuator.apply(service, &detection).await;
        ServiceDecision {
            service: service.to_string(),
            detection,
            actuation,
        }
    }
}
