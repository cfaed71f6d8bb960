//! gRPC surface of the sampler.
//!
//! - `TraceService/Export` ingests OTLP batches from a collector.
//! - `TraceSampler/SampleTraces` streams one hex trace id per accepted span.
//! - `TraceSampler/SampleTracesData` streams accepted batches as-is.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use tracescale_proto::collector::trace_service_server::{TraceService, TraceServiceServer};
use tracescale_proto::collector::{ExportTraceServiceRequest, ExportTraceServiceResponse};
use tracescale_proto::sampler::trace_sampler_server::{TraceSampler, TraceSamplerServer};
use tracescale_proto::sampler::{
    SampleTracesDataRequest, SampleTracesRequest, SampleTracesResponse,
};
use tracescale_proto::trace::{ResourceSpans, TracesData};

use crate::error::SamplerResult;
use crate::hub::TraceHub;
use crate::sampler::{SpanSampler, batch_trace_ids};

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Counts from one [`SamplerService::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub received: usize,
    pub accepted: usize,
    /// Subscribers the accepted batch was handed to.
    pub delivered: usize,
    /// False when nothing was accepted or the skip phase is still running.
    pub published: bool,
}

#[derive(Clone)]
pub struct SamplerService {
    sampler: Arc<Mutex<SpanSampler>>,
    hub: TraceHub,
}

impl SamplerService {
    pub fn new(sampler: Arc<Mutex<SpanSampler>>, hub: TraceHub) -> Self {
        Self { sampler, hub }
    }

    pub fn sampler(&self) -> &Arc<Mutex<SpanSampler>> {
        &self.sampler
    }

    pub fn hub(&self) -> &TraceHub {
        &self.hub
    }

    /// Filter a batch and publish what was accepted.
    pub fn ingest(&self, resource_spans: &[ResourceSpans]) -> IngestReport {
        let outcome = self.sampler.lock().filter(resource_spans);
        let mut report = IngestReport {
            received: outcome.received,
            accepted: outcome.accepted,
            ..IngestReport::default()
        };
        if let Some(batch) = outcome.batch {
            report.delivered = self.hub.publish(batch);
            report.published = true;
            debug!(accepted = report.accepted, subscribers = report.delivered, "published batch");
        }
        report
    }

    /// Serve both services on `addr` until shutdown is signalled.
    pub async fn serve(self, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> SamplerResult<()> {
        info!(%addr, "sampler gRPC server starting");
        tonic::transport::Server::builder()
            .add_service(TraceServiceServer::new(self.clone()))
            .add_service(TraceSamplerServer::new(self))
            .serve_with_shutdown(addr, async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        info!("sampler gRPC server stopped");
        Ok(())
    }
}

#[tonic::async_trait]
impl TraceService for SamplerService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let report = self.ingest(&req.resource_spans);
        debug!(received = report.received, accepted = report.accepted, "export handled");
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl TraceSampler for SamplerService {
    type SampleTracesStream = ResponseStream<SampleTracesResponse>;
    type SampleTracesDataStream = ResponseStream<TracesData>;

    async fn sample_traces(
        &self,
        _request: Request<SampleTracesRequest>,
    ) -> Result<Response<Self::SampleTracesStream>, Status> {
        let subscription = self.hub.subscribe();
        info!(subscriber = subscription.id(), "trace id client connected");

        let stream = subscription.flat_map(|batch| {
            let ids = batch_trace_ids(&batch);
            futures_util::stream::iter(
                ids.into_iter()
                    .map(|trace_id| Ok(SampleTracesResponse { trace_id })),
            )
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn sample_traces_data(
        &self,
        _request: Request<SampleTracesDataRequest>,
    ) -> Result<Response<Self::SampleTracesDataStream>, Status> {
        let subscription = self.hub.subscribe();
        info!(subscriber = subscription.id(), "trace data client connected");

        let stream = subscription.map(|batch| Ok(Arc::unwrap_or_clone(batch)));
        Ok(Response::new(Box::pin(stream)))
    }
}
