//! The span filter.
//!
//! Every `(service, operation)` key starts cold. Cold spans train the
//! model and are always accepted; once a key has trained
//! `min_train_count` times it is warm and its spans are scored instead,
//! kept only when the score exceeds `min_score`. Warm spans never train.
//!
//! A global skip counter drops the first spans after startup before they
//! reach either path.

use std::collections::HashMap;

use tracing::{debug, info};

use tracescale_core::SamplerConfig;
use tracescale_model::span::nanos_to_ms;
use tracescale_model::{hex_id, service_name_of};
use tracescale_proto::trace::{ResourceSpans, ScopeSpans, Span, TracesData};

use crate::featurize::{Featurizer, sanitize_operation};
use crate::hst::{AnomalyScorer, HalfSpaceTrees};

/// What happened to one span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Dropped during the startup skip phase.
    Skipped,
    /// Cold: learned and accepted.
    Trained,
    /// Cold but too slow to learn from; accepted anyway.
    ColdAccepted,
    Accepted { score: f64 },
    Rejected { score: f64 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Verdict::Trained | Verdict::ColdAccepted | Verdict::Accepted { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Warm spans that were scored.
    pub scored_spans: u64,
    /// Scored spans that were accepted.
    pub sampled_spans: u64,
    pub skip_remaining: u64,
    pub services: usize,
    pub operations: usize,
}

impl SamplerStats {
    /// Percentage of scored spans that were accepted.
    pub fn sample_rate(&self) -> f64 {
        if self.scored_spans == 0 {
            0.0
        } else {
            100.0 * self.sampled_spans as f64 / self.scored_spans as f64
        }
    }
}

/// Result of filtering one export request.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Accepted spans regrouped into their resource/scope nesting. `None`
    /// when nothing was accepted or the skip phase is still running.
    pub batch: Option<TracesData>,
    pub received: usize,
    pub accepted: usize,
}

/// Scores incoming spans and decides which ones are kept.
pub struct SpanSampler {
    scorer: Box<dyn AnomalyScorer + Send>,
    featurizer: Featurizer,
    seen: HashMap<(String, String), u64>,
    skip_remaining: u64,
    min_train_count: u64,
    min_score: f64,
    max_train_duration_ms: f64,
    scored_spans: u64,
    sampled_spans: u64,
}

impl SpanSampler {
    /// Sampler backed by a half-space trees model sized for the config.
    pub fn from_config(config: &SamplerConfig) -> Self {
        let featurizer = Featurizer::new(config.category_feature_length, config.max_duration_ms);
        let scorer = HalfSpaceTrees::new(featurizer.n_features(), &config.model);
        Self::with_scorer(config, Box::new(scorer))
    }

    /// Sampler over any [`AnomalyScorer`].
    pub fn with_scorer(config: &SamplerConfig, scorer: Box<dyn AnomalyScorer + Send>) -> Self {
        Self {
            scorer,
            featurizer: Featurizer::new(config.category_feature_length, config.max_duration_ms),
            seen: HashMap::new(),
            skip_remaining: config.skip_span_count,
            min_train_count: config.min_train_count,
            min_score: config.min_score,
            max_train_duration_ms: config.max_train_duration_ms,
            scored_spans: 0,
            sampled_spans: 0,
        }
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            scored_spans: self.scored_spans,
            sampled_spans: self.sampled_spans,
            skip_remaining: self.skip_remaining,
            services: self.featurizer.service_count(),
            operations: self.featurizer.operation_count(),
        }
    }

    /// Spans judged so far for this `(service, operation)` key.
    pub fn seen_count(&self, service: &str, operation: &str) -> u64 {
        self.seen
            .get(&(service.to_string(), sanitize_operation(operation).into_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Train on a span without scoring it or touching the seen counts.
    pub fn learn(&mut self, service: &str, operation: &str, duration_ms: f64) {
        let operation = sanitize_operation(operation);
        let features = self.featurizer.featurize(service, &operation, duration_ms);
        self.scorer.learn(&features);
    }

    /// Decide a single span.
    pub fn judge(&mut self, service: &str, operation: &str, duration_ms: f64) -> Verdict {
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            return Verdict::Skipped;
        }

        let operation = sanitize_operation(operation).into_owned();
        let features = self.featurizer.featurize(service, &operation, duration_ms);
        let key = (service.to_string(), operation);
        let seen = self.seen.get(&key).copied().unwrap_or(0);

        if seen < self.min_train_count {
            if duration_ms < self.max_train_duration_ms {
                self.scorer.learn(&features);
                self.seen.insert(key, seen + 1);
                return Verdict::Trained;
            }
            return Verdict::ColdAccepted;
        }

        let score = self.scorer.score(&features);
        self.scored_spans += 1;
        if score > self.min_score {
            self.sampled_spans += 1;
            debug!(
                sampled = self.sampled_spans,
                scored = self.scored_spans,
                rate_pct = self.stats().sample_rate(),
                "span sampled"
            );
            Verdict::Accepted { score }
        } else {
            Verdict::Rejected { score }
        }
    }

    /// Filter an export request, keeping the resource/scope structure of
    /// the accepted spans and dropping empty groups.
    pub fn filter(&mut self, resource_spans: &[ResourceSpans]) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut kept_resources = Vec::new();

        for rs in resource_spans {
            let service = service_name_of(rs.resource.as_ref());
            let mut kept_scopes = Vec::new();

            for ss in &rs.scope_spans {
                let mut kept_spans: Vec<Span> = Vec::new();
                for span in &ss.spans {
                    outcome.received += 1;
                    let duration_ms = nanos_to_ms(
                        span.end_time_unix_nano
                            .saturating_sub(span.start_time_unix_nano),
                    );
                    if self.judge(&service, &span.name, duration_ms).is_accepted() {
                        kept_spans.push(span.clone());
                    }
                }
                if !kept_spans.is_empty() {
                    outcome.accepted += kept_spans.len();
                    kept_scopes.push(ScopeSpans {
                        scope: ss.scope.clone(),
                        spans: kept_spans,
                        schema_url: ss.schema_url.clone(),
                    });
                }
            }
            if !kept_scopes.is_empty() {
                kept_resources.push(ResourceSpans {
                    resource: rs.resource.clone(),
                    scope_spans: kept_scopes,
                    schema_url: rs.schema_url.clone(),
                });
            }
        }

        if self.skip_remaining > 0 {
            info!(remaining = self.skip_remaining, "skipping spans");
        } else if !kept_resources.is_empty() {
            outcome.batch = Some(TracesData {
                resource_spans: kept_resources,
            });
        }
        outcome
    }
}

/// Hex trace id of every span in a batch, one entry per span.
pub fn batch_trace_ids(batch: &TracesData) -> Vec<String> {
    batch
        .resource_spans
        .iter()
        .flat_map(|rs| &rs.scope_spans)
        .flat_map(|ss| &ss.spans)
        .filter_map(|span| hex_id(&span.trace_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracescale_proto::common::{AnyValue, KeyValue, any_value};
    use tracescale_proto::resource::Resource;

    /// Scorer returning a fixed score and counting calls.
    #[derive(Clone, Default)]
    struct StubScorer {
        score: f64,
        learned: Arc<AtomicUsize>,
        scored: Arc<AtomicUsize>,
    }

    impl AnomalyScorer for StubScorer {
        fn learn(&mut self, _features: &[f64]) {
            self.learned.fetch_add(1, Ordering::SeqCst);
        }

        fn score(&self, _features: &[f64]) -> f64 {
            self.scored.fetch_add(1, Ordering::SeqCst);
            self.score
        }
    }

    fn config(min_train_count: u64, skip: u64) -> SamplerConfig {
        SamplerConfig {
            min_train_count,
            skip_span_count: skip,
            min_score: 0.6,
            max_train_duration_ms: 1000.0,
            ..SamplerConfig::default()
        }
    }

    fn span(trace: u8, name: &str, duration_ms: u64) -> Span {
        Span {
            trace_id: vec![trace; 16],
            span_id: vec![trace, 1, 2, 3, 4, 5, 6, 7],
            name: name.into(),
            start_time_unix_nano: 1_000_000,
            end_time_unix_nano: 1_000_000 + duration_ms * 1_000_000,
            ..Default::default()
        }
    }

    fn resource(service: &str, scopes: Vec<Vec<Span>>) -> ResourceSpans {
        ResourceSpans {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "service.name".into(),
                    value: Some(AnyValue {
                        value: Some(any_value::Value::StringValue(service.into())),
                    }),
                }],
                dropped_attributes_count: 0,
            }),
            scope_spans: scopes
                .into_iter()
                .map(|spans| ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                })
                .collect(),
            schema_url: String::new(),
        }
    }

    #[test]
    fn cold_spans_train_then_warm_spans_are_scored() {
        let stub = StubScorer {
            score: 0.2,
            ..Default::default()
        };
        let mut sampler = SpanSampler::with_scorer(&config(3, 0), Box::new(stub.clone()));

        for _ in 0..3 {
            assert_eq!(sampler.judge("frontend", "GET /", 10.0), Verdict::Trained);
        }
        assert_eq!(stub.learned.load(Ordering::SeqCst), 3);
        assert_eq!(stub.scored.load(Ordering::SeqCst), 0);
        assert_eq!(sampler.seen_count("frontend", "GET /"), 3);

        assert_eq!(
            sampler.judge("frontend", "GET /", 10.0),
            Verdict::Rejected { score: 0.2 }
        );
        assert_eq!(stub.learned.load(Ordering::SeqCst), 3);
        assert_eq!(stub.scored.load(Ordering::SeqCst), 1);

        // A new key starts cold again.
        assert_eq!(sampler.judge("cart", "GET /", 10.0), Verdict::Trained);
    }

    #[test]
    fn warm_spans_above_min_score_are_kept_without_training() {
        let stub = StubScorer {
            score: 0.9,
            ..Default::default()
        };
        let mut sampler = SpanSampler::with_scorer(&config(1, 0), Box::new(stub.clone()));
        sampler.judge("s", "op", 1.0);

        assert_eq!(sampler.judge("s", "op", 1.0), Verdict::Accepted { score: 0.9 });
        assert_eq!(stub.learned.load(Ordering::SeqCst), 1);
        let stats = sampler.stats();
        assert_eq!(stats.scored_spans, 1);
        assert_eq!(stats.sampled_spans, 1);
        assert_eq!(stats.sample_rate(), 100.0);
    }

    #[test]
    fn slow_cold_spans_are_kept_but_not_learned() {
        let stub = StubScorer::default();
        let mut sampler = SpanSampler::with_scorer(&config(2, 0), Box::new(stub.clone()));

        assert_eq!(sampler.judge("s", "op", 1500.0), Verdict::ColdAccepted);
        assert_eq!(stub.learned.load(Ordering::SeqCst), 0);
        assert_eq!(sampler.seen_count("s", "op"), 0);
    }

    #[test]
    fn sanitized_operations_share_a_key() {
        let mut sampler = SpanSampler::with_scorer(&config(2, 0), Box::new(StubScorer::default()));
        sampler.judge("frontend", "GET /api/products/AAA111", 1.0);
        sampler.judge("frontend", "GET /api/products/BBB222", 1.0);
        assert_eq!(sampler.seen_count("frontend", "GET /api/products"), 2);
    }

    #[test]
    fn skip_phase_drops_first_spans_without_training() {
        let stub = StubScorer::default();
        let mut sampler = SpanSampler::with_scorer(&config(20, 5), Box::new(stub.clone()));

        let spans: Vec<Span> = (0..5).map(|i| span(i, "GET /", 10)).collect();
        let outcome = sampler.filter(&[resource("frontend", vec![spans])]);
        assert_eq!(outcome.received, 5);
        assert_eq!(outcome.accepted, 0);
        assert!(outcome.batch.is_none());
        assert_eq!(stub.learned.load(Ordering::SeqCst), 0);
        assert_eq!(stub.scored.load(Ordering::SeqCst), 0);
        assert_eq!(sampler.stats().skip_remaining, 0);

        let outcome = sampler.filter(&[resource("frontend", vec![vec![span(9, "GET /", 10)]])]);
        assert_eq!(outcome.accepted, 1);
        assert!(outcome.batch.is_some());
    }

    #[test]
    fn nothing_published_while_skipping() {
        let mut sampler = SpanSampler::with_scorer(&config(20, 2), Box::new(StubScorer::default()));
        let spans: Vec<Span> = (0..3).map(|i| span(i, "GET /", 10)).collect();

        // The skip phase ends inside this request, so the third span is
        // published.
        let outcome = sampler.filter(&[resource("frontend", vec![spans])]);
        assert_eq!(outcome.accepted, 1);
        assert!(outcome.batch.is_some());

        let mut sampler = SpanSampler::with_scorer(&config(20, 10), Box::new(StubScorer::default()));
        let outcome = sampler.filter(&[resource("frontend", vec![vec![span(1, "GET /", 10)]])]);
        assert!(outcome.batch.is_none());
    }

    #[test]
    fn regrouping_drops_empty_scopes_and_resources() {
        let stub = StubScorer {
            score: 0.1,
            ..Default::default()
        };
        let mut sampler = SpanSampler::with_scorer(&config(1, 0), Box::new(stub));
        // Warm up "quiet" so its next span is scored and dropped.
        sampler.judge("quiet", "op", 1.0);

        let request = [
            resource("quiet", vec![vec![span(1, "op", 1)]]),
            resource(
                "busy",
                vec![vec![span(2, "a", 1)], vec![], vec![span(3, "b", 1), span(4, "c", 1)]],
            ),
        ];
        let outcome = sampler.filter(&request);
        let batch = outcome.batch.unwrap();

        assert_eq!(batch.resource_spans.len(), 1);
        let busy = &batch.resource_spans[0];
        assert_eq!(service_name_of(busy.resource.as_ref()), "busy");
        assert_eq!(busy.scope_spans.len(), 2);
        assert_eq!(busy.scope_spans[1].spans.len(), 2);
        assert_eq!(outcome.accepted, 3);
        assert_eq!(batch_trace_ids(&batch).len(), 3);
        assert_eq!(batch_trace_ids(&batch)[0], "02".repeat(16));
    }

    #[test]
    fn pretraining_does_not_advance_seen_counts() {
        let stub = StubScorer::default();
        let mut sampler = SpanSampler::with_scorer(&config(3, 100), Box::new(stub.clone()));
        sampler.learn("frontend", "GET /", 10.0);

        assert_eq!(stub.learned.load(Ordering::SeqCst), 1);
        assert_eq!(sampler.seen_count("frontend", "GET /"), 0);
        assert_eq!(sampler.stats().skip_remaining, 100);
    }

    #[test]
    fn real_model_runs_end_to_end() {
        let mut sampler = SpanSampler::from_config(&config(2, 0));
        let spans: Vec<Span> = (0..10).map(|i| span(i, "GET /", 10)).collect();
        let outcome = sampler.filter(&[resource("frontend", vec![spans])]);
        assert_eq!(outcome.received, 10);
        assert!(outcome.accepted >= 2);
        assert_eq!(sampler.stats().services, 1);
    }
}
