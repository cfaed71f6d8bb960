//! Where sampled trace notifications come from.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::debug;

use tracescale_core::SubscriptionKind;
use tracescale_proto::sampler::trace_sampler_client::TraceSamplerClient;
use tracescale_proto::sampler::{SampleTracesDataRequest, SampleTracesRequest};
use tracescale_proto::trace::TracesData;

use crate::error::ConsumerError;

/// One item delivered by the sampler.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TraceId(String),
    TraceData(TracesData),
}

pub type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<Notification, ConsumerError>> + Send>>;

/// A subscribable stream of sampled traces.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn subscribe(&self) -> Result<NotificationStream, ConsumerError>;
}

/// Subscribes to a sampler over gRPC. Each call opens a new connection.
#[derive(Debug, Clone)]
pub struct GrpcSampleSource {
    endpoint: String,
    kind: SubscriptionKind,
}

impl GrpcSampleSource {
    /// `channel` is `host:port` or a full `http://` URL.
    pub fn new(channel: &str, kind: SubscriptionKind) -> Self {
        let endpoint = if channel.contains("://") {
            channel.to_string()
        } else {
            format!("http://{channel}")
        };
        Self { endpoint, kind }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SampleSource for GrpcSampleSource {
    async fn subscribe(&self) -> Result<NotificationStream, ConsumerError> {
        debug!(endpoint = %self.endpoint, kind = %self.kind, "subscribing to sampler");
        let mut client = TraceSamplerClient::connect(self.endpoint.clone()).await?;

        let stream: NotificationStream = match self.kind {
            SubscriptionKind::Ids => {
                let inner = client
                    .sample_traces(SampleTracesRequest {})
                    .await?
                    .into_inner();
                Box::pin(inner.map(|item| {
                    item.map(|r| Notification::TraceId(r.trace_id))
                        .map_err(ConsumerError::from)
                }))
            }
            SubscriptionKind::Data => {
                let inner = client
                    .sample_traces_data(SampleTracesDataRequest {})
                    .await?
                    .into_inner();
                Box::pin(inner.map(|item| {
                    item.map(Notification::TraceData)
                        .map_err(ConsumerError::from)
                }))
            }
        };
        Ok(stream)
    }
}
