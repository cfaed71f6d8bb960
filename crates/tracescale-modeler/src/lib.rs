//! tracescale-modeler — turns sampled traces into scaling decisions.
//!
//! ```text
//! SampleSource ──► TraceConsumer ──► TraceProcessor::process ──► queue ──► worker
//!  (gRPC stream)    (reconnects)       fetch, build, track               │
//!                                                                        ▼
//!                                          DecisionEngine ──► ScalingActuator
//! ```

pub mod consumer;
pub mod engine;
pub mod error;
pub mod processor;
pub mod source;

pub use consumer::{ConnectionState, TraceConsumer};
pub use engine::{DecisionEngine, ServiceDecision, build_policy};
pub use error::{ConsumerError, ProcessError, ProcessResult};
pub use processor::TraceProcessor;
pub use source::{GrpcSampleSource, Notification, NotificationStream, SampleSource};
