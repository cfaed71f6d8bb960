//! Bulk pretraining from the tracing backend.
//!
//! Before serving, the sampler searches the backend for recent traces,
//! keeps those that contain a root span, and learns every span of them
//! without scoring. Failures (including fewer traces than requested) are
//! retried with exponential backoff until training succeeds or shutdown
//! is signalled.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use tracescale_backend::{ROOT_SERVICE_QUERY, TimeRange, TraceBackend};
use tracescale_core::SamplerConfig;
use tracescale_model::{Span, parse_spans};

use crate::error::SamplerResult;
use crate::sampler::SpanSampler;

#[derive(Debug, Clone)]
pub struct PretrainSettings {
    pub train_size: usize,
    pub start_delta: Duration,
    pub query: String,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl PretrainSettings {
    pub fn from_config(config: &SamplerConfig) -> Self {
        let (backoff_min, backoff_max) = config.pretrain_backoff();
        Self {
            train_size: config.train_size,
            start_delta: config.start_delta(),
            query: ROOT_SERVICE_QUERY.to_string(),
            backoff_min,
            backoff_max: backoff_max.max(backoff_min),
        }
    }
}

/// One attempt: search, fetch, and keep spans of traces that have a root.
pub async fn fetch_training_spans(
    backend: &dyn TraceBackend,
    settings: &PretrainSettings,
) -> SamplerResult<Vec<Span>> {
    let range = TimeRange::last(settings.start_delta);
    let ids = backend
        .search_traces(range, settings.train_size, &settings.query)
        .await?;

    let mut spans = Vec::new();
    for id in &ids {
        let data = match backend.get_trace_by_id(id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(trace_id = %id, error = %e, "could not retrieve training trace");
                continue;
            }
        };
        let trace_spans = parse_spans(&data);
        if trace_spans.iter().any(Span::is_root) {
            spans.extend(trace_spans);
        }
    }
    Ok(spans)
}

/// Pretrain until it succeeds. Returns the number of spans learned, or
/// `None` when shutdown arrived first.
pub async fn pretrain(
    sampler: &Mutex<SpanSampler>,
    backend: &dyn TraceBackend,
    settings: &PretrainSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Option<usize> {
    info!(train_size = settings.train_size, "starting pretraining");
    let mut delay = settings.backoff_min;

    loop {
        match fetch_training_spans(backend, settings).await {
            Ok(spans) => {
                let mut sampler = sampler.lock();
                for span in &spans {
                    sampler.learn(&span.service_name, &span.operation_name, span.duration_ms());
                }
                info!(spans = spans.len(), "pretraining complete");
                return Some(spans.len());
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?delay, "pretraining failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("pretraining cancelled");
                return None;
            }
        }
        delay = (delay * 2).min(settings.backoff_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SamplerError;
    use crate::hst::AnomalyScorer;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracescale_backend::InMemoryBackend;
    use tracescale_proto::trace::{ResourceSpans, ScopeSpans, TracesData};

    #[derive(Clone, Default)]
    struct CountingScorer(Arc<AtomicUsize>);

    impl AnomalyScorer for CountingScorer {
        fn learn(&mut self, _features: &[f64]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn score(&self, _features: &[f64]) -> f64 {
            0.0
        }
    }

    fn trace(id: u8, with_root: bool) -> TracesData {
        let span = |span_id: u8, parent: Option<u8>| tracescale_proto::trace::Span {
            trace_id: vec![id; 16],
            span_id: vec![span_id; 8],
            parent_span_id: parent.map(|p| vec![p; 8]).unwrap_or_default(),
            name: "GET /".into(),
            start_time_unix_nano: 0,
            end_time_unix_nano: 5_000_000,
            ..Default::default()
        };
        let spans = if with_root {
            vec![span(1, None), span(2, Some(1))]
        } else {
            vec![span(2, Some(1)), span(3, Some(1))]
        };
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn settings(train_size: usize) -> PretrainSettings {
        PretrainSettings {
            train_size,
            start_delta: Duration::from_secs(3600),
            query: ROOT_SERVICE_QUERY.to_string(),
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn keeps_only_traces_with_a_root() {
        let backend = InMemoryBackend::new();
        backend.insert(hex::encode([1u8; 16]), trace(1, true));
        backend.insert(hex::encode([2u8; 16]), trace(2, false));

        let spans = fetch_training_spans(&backend, &settings(2)).await.unwrap();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.trace_id == hex::encode([1u8; 16])));
    }

    #[tokio::test]
    async fn too_few_traces_is_insufficient() {
        let backend = InMemoryBackend::new();
        backend.insert("aa", trace(1, true));

        let err = fetch_training_spans(&backend, &settings(5)).await.unwrap_err();
        assert!(matches!(
            err,
            SamplerError::TrainingDataInsufficient {
                requested: 5,
                received: 1
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_data_arrives() {
        let backend = Arc::new(InMemoryBackend::new());
        let learned = CountingScorer::default();
        let sampler = Arc::new(Mutex::new(SpanSampler::with_scorer(
            &SamplerConfig::default(),
            Box::new(learned.clone()),
        )));
        let (_tx, rx) = watch::channel(false);

        let task = {
            let backend = Arc::clone(&backend);
            let sampler = Arc::clone(&sampler);
            tokio::spawn(async move { pretrain(&sampler, backend.as_ref(), &settings(1), rx).await })
        };

        // First attempt fails immediately, then waits 5s; second waits 10s.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!task.is_finished());
        backend.insert(hex::encode([1u8; 16]), trace(1, true));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(task.await.unwrap(), Some(2));
        assert_eq!(learned.0.load(Ordering::SeqCst), 2);
        assert_eq!(sampler.lock().seen_count("unknown_service", "GET /"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_retries() {
        let backend = InMemoryBackend::new();
        let sampler = Mutex::new(SpanSampler::from_config(&SamplerConfig::default()));
        let (tx, rx) = watch::channel(false);

        let settings = settings(1);
        let run = pretrain(&sampler, &backend, &settings, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        };
        let (result, ()) = tokio::join!(run, stop);
        assert_eq!(result, None);
    }
}
