//! Orchestration collaborator: the capability that changes replica counts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{OrchestrationError, OrchestrationResult};

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Change replicas by `replica_delta`, never below zero. Returns the new
    /// count, or `None` when the count would not change.
    async fn scale_service(
        &self,
        deployment: &str,
        replica_delta: i64,
    ) -> OrchestrationResult<Option<u32>>;

    async fn current_scale(&self, deployment: &str) -> OrchestrationResult<u32>;

    async fn desired_scale(&self, deployment: &str) -> OrchestrationResult<u32>;

    async fn deployments(&self) -> OrchestrationResult<Vec<String>>;

    async fn scale_max(&self, deployment: &str) -> OrchestrationResult<u32>;

    async fn scale_min(&self, deployment: &str) -> OrchestrationResult<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentScale {
    pub current: u32,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

/// Orchestrator keeping replica counts in memory. Used for observe-only
/// deployments without a cluster and in tests.
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    deployments: RwLock<BTreeMap<String, DeploymentScale>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, deployment: &str, replicas: u32, min: u32, max: u32) {
        self.deployments.write().await.insert(
            deployment.to_string(),
            DeploymentScale {
                current: replicas,
                desired: replicas,
                min,
                max,
            },
        );
    }

    async fn get(&self, deployment: &str) -> OrchestrationResult<DeploymentScale> {
        self.deployments
            .read()
            .await
            .get(deployment)
            .copied()
            .ok_or_else(|| OrchestrationError::DeploymentNotFound(deployment.to_string()))
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn scale_service(
        &self,
        deployment: &str,
        replica_delta: i64,
    ) -> OrchestrationResult<Option<u32>> {
        let mut deployments = self.deployments.write().await;
        let scale = deployments
            .get_mut(deployment)
            .ok_or_else(|| OrchestrationError::DeploymentNotFound(deployment.to_string()))?;

        let target = (scale.current as i64 + replica_delta).clamp(0, u32::MAX as i64) as u32;
        if target == scale.current {
            info!(%deployment, replicas = scale.current, "no scaling action required");
            return Ok(None);
        }

        info!(%deployment, from = scale.current, to = target, replica_delta, "scaled deployment");
        scale.current = target;
        scale.desired = target;
        Ok(Some(target))
    }

    async fn current_scale(&self, deployment: &str) -> OrchestrationResult<u32> {
        Ok(self.get(deployment).await?.current)
    }

    async fn desired_scale(&self, deployment: &str) -> OrchestrationResult<u32> {
        Ok(self.get(deployment).await?.desired)
    }

    async fn deployments(&self) -> OrchestrationResult<Vec<String>> {
        Ok(self.deployments.read().await.keys().cloned().collect())
    }

    async fn scale_max(&self, deployment: &str) -> OrchestrationResult<u32> {
        Ok(self.get(deployment).await?.max)
    }

    async fn scale_min(&self, deployment: &str) -> OrchestrationResult<u32> {
        Ok(self.get(deployment).await?.min)
    }
}
