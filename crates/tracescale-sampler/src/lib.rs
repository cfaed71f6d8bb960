//! tracescale-sampler — adaptive span sampling.
//!
//! Spans pushed by an OpenTelemetry collector are featurized and either
//! learned (cold keys) or scored (warm keys) by an online half-space
//! trees model. Accepted spans are regrouped and multicast to every
//! attached subscriber.
//!
//! # Architecture
//!
//! ```text
//! Export ──► SpanSampler::filter ──► TraceHub::publish ──► Subscription (per client)
//!               │                                              │
//!               ├─ Featurizer (service/operation encodings)    ├─ SampleTraces (ids)
//!               └─ AnomalyScorer (HalfSpaceTrees)              └─ SampleTracesData (batches)
//! ```

pub mod error;
pub mod featurize;
pub mod hst;
pub mod hub;
pub mod pretrain;
pub mod sampler;
pub mod service;

pub use error::{SamplerError, SamplerResult};
pub use featurize::{Featurizer, sanitize_operation};
pub use hst::{AnomalyScorer, HalfSpaceTrees};
pub use hub::{Subscription, TraceHub};
pub use pretrain::{PretrainSettings, fetch_training_spans, pretrain};
pub use sampler::{FilterOutcome, SamplerStats, SpanSampler, Verdict, batch_trace_ids};
pub use service::{IngestReport, SamplerService};
