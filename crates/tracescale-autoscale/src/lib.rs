//! tracescale-autoscale — latency-driven scaling decisions.
//!
//! A [`ScalingPolicy`] turns a service's rolling latency window into a
//! [`Detection`]; the [`ScalingActuator`] either logs it (observe mode) or
//! applies it through an [`Orchestrator`] (enforce mode).
//!
//! Two policies are provided:
//!
//! - [`HybridPolicy`]: adaptive EWMA bounds around the service's own
//!   history, with CUSUM drift reported alongside (see [`detector`]).
//! - [`StaticThresholdPolicy`]: fixed bounds from the
//!   `LatencyBasedAutoScaler` resource, compared against the window average.

pub mod actuator;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod policy;

pub use actuator::{Actuation, ScalingActuator};
pub use detector::{CusumReport, DEFAULT_EWMA_MULTIPLIER, Detection, HybridDetector, ScaleAction};
pub use error::{OrchestrationError, OrchestrationResult};
pub use orchestrator::{DeploymentScale, InMemoryOrchestrator, Orchestrator};
pub use policy::{DEFAULT_STATIC_MIN_SAMPLES, HybridPolicy, ScalingPolicy, StaticThresholdPolicy};
