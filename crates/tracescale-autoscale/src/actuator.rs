//! Turns detections into orchestration calls.
//!
//! In observe mode decisions are only logged. In enforce mode the target
//! deployment is resolved, cooldown windows are checked, and the replica
//! change is clamped to the deployment's min/max before `scale_service`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tracescale_config::ConfigStore;
use tracescale_core::ScalingMode;

use crate::detector::{Detection, ScaleAction};
use crate::orchestrator::Orchestrator;

/// What the actuator did with a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    /// The detection asked for nothing.
    NoAction,
    /// Observe mode: logged only.
    Observed(ScaleAction),
    /// A previous change in the same direction is too recent.
    CoolingDown(ScaleAction),
    /// Already at the min/max limit.
    AtLimit { replicas: u32 },
    Scaled { deployment: String, from: u32, to: u32 },
    Failed(String),
}

#[derive(Debug, Default)]
struct CooldownState {
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

/// Applies scaling decisions to an [`Orchestrator`], honoring the mode and
/// per-deployment cooldowns.
pub struct ScalingActuator {
    mode: ScalingMode,
    orchestrator: Arc<dyn Orchestrator>,
    config: Option<Arc<dyn ConfigStore>>,
    scale_up_cooldown: Duration,
    scale_down_cooldown: Duration,
    cooldowns: Mutex<HashMap<String, CooldownState>>,
}

impl ScalingActuator {
    pub fn new(mode: ScalingMode, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            mode,
            orchestrator,
            config: None,
            scale_up_cooldown: Duration::from_secs(30),
            scale_down_cooldown: Duration::from_secs(60),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve service names to deployments through the configuration store.
    pub fn with_config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_cooldowns(mut self, scale_up: Duration, scale_down: Duration) -> Self {
        self.scale_up_cooldown = scale_up;
        self.scale_down_cooldown = scale_down;
        self
    }

    pub fn mode(&self) -> ScalingMode {
        self.mode
    }

    fn resolve_deployment(&self, service: &str) -> String {
        match &self.config {
            Some(config) => config.target_deployment(service).unwrap_or_else(|e| {
                debug!(%service, error = %e, "no target deployment configured, using service name");
                service.to_string()
            }),
            None => service.to_string(),
        }
    }

    pub async fn apply(&self, service: &str, detection: &Detection) -> Actuation {
        let action = detection.action;
        if action == ScaleAction::NoAction {
            return Actuation::NoAction;
        }

        if self.mode == ScalingMode::Observe {
            info!(%service, %action, "observe mode, not scaling");
            return Actuation::Observed(action);
        }

        let now = Instant::now();
        {
            let cooldowns = self.cooldowns.lock().await;
            if let Some(state) = cooldowns.get(service) {
                let (last, window) = match action {
                    ScaleAction::ScaleUp => (state.last_scale_up, self.scale_up_cooldown),
                    _ => (state.last_scale_down, self.scale_down_cooldown),
                };
                if last.is_some_and(|t| now.duration_since(t) < window) {
                    debug!(%service, %action, "within cooldown window");
                    return Actuation::CoolingDown(action);
                }
            }
        }

        let deployment = self.resolve_deployment(service);
        match self.scale(&deployment, action).await {
            Ok(outcome) => {
                if matches!(outcome, Actuation::Scaled { .. }) {
                    let mut cooldowns = self.cooldowns.lock().await;
                    let state = cooldowns.entry(service.to_string()).or_default();
                    match action {
                        ScaleAction::ScaleUp => state.last_scale_up = Some(now),
                        _ => state.last_scale_down = Some(now),
                    }
                }
                outcome
            }
            Err(e) => {
                warn!(%service, %deployment, %action, error = %e, "scaling action failed");
                Actuation::Failed(e.to_string())
            }
        }
    }

    async fn scale(
        &self,
        deployment: &str,
        action: ScaleAction,
    ) -> crate::error::OrchestrationResult<Actuation> {
        let current = self.orchestrator.current_scale(deployment).await?;
        let min = self.orchestrator.scale_min(deployment).await?;
        let max = self.orchestrator.scale_max(deployment).await?.max(min);

        let target = (current as i64 + action.replica_delta()).clamp(min as i64, max as i64) as u32;
        if target == current {
            debug!(%deployment, replicas = current, min, max, "at scaling limit");
            return Ok(Actuation::AtLimit { replicas: current });
        }

        match self
            .orchestrator
            .scale_service(deployment, target as i64 - current as i64)
            .await?
        {
            Some(to) => {
                info!(%deployment, from = current, to, "scaled");
                Ok(Actuation::Scaled {
                    deployment: deployment.to_string(),
                    from: current,
                    to,
                })
            }
            None => Ok(Actuation::AtLimit { replicas: current }),
        }
    }
}
