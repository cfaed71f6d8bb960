//! Error types for orchestration calls.

use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("orchestrator error: {0}")]
    Backend(String),
}
