//! tracescale-proto — generated protobuf types and gRPC stubs.
//!
//! Module nesting mirrors the protobuf packages so that cross-package
//! references emitted by prost (`super::super::...`) resolve.
//!
//! ```text
//! opentelemetry.proto.common.v1            AnyValue, KeyValue, InstrumentationScope
//! opentelemetry.proto.resource.v1          Resource
//! opentelemetry.proto.trace.v1             TracesData → ResourceSpans → ScopeSpans → Span
//! opentelemetry.proto.collector.trace.v1   TraceService (Export)
//! tracescale.sampler.v1                    TraceSampler (SampleTraces, SampleTracesData)
//! ```

pub mod opentelemetry {
    pub mod proto {
        pub mod common {
            pub mod v1 {
                tonic::include_proto!("opentelemetry.proto.common.v1");
            }
        }

        pub mod resource {
            pub mod v1 {
                tonic::include_proto!("opentelemetry.proto.resource.v1");
            }
        }

        pub mod trace {
            pub mod v1 {
                tonic::include_proto!("opentelemetry.proto.trace.v1");
            }
        }

        pub mod collector {
            pub mod trace {
                pub mod v1 {
                    tonic::include_proto!("opentelemetry.proto.collector.trace.v1");
                }
            }
        }
    }
}

pub mod tracescale {
    pub mod sampler {
        pub mod v1 {
            tonic::include_proto!("tracescale.sampler.v1");
        }
    }
}

pub use opentelemetry::proto::collector::trace::v1 as collector;
pub use opentelemetry::proto::common::v1 as common;
pub use opentelemetry::proto::resource::v1 as resource;
pub use opentelemetry::proto::trace::v1 as trace;
pub use tracescale::sampler::v1 as sampler;
