//! tracescale-model — spans, attribute bags and trace trees.
//!
//! Wire batches are flattened with [`parse_spans`] and assembled with
//! [`Trace::build`], which reports soft integrity problems as
//! [`TraceFinding`]s instead of failing.

pub mod attributes;
pub mod error;
pub mod span;
pub mod trace;

pub use attributes::{AttributeValue, Attributes, UNKNOWN_SERVICE};
pub use error::{TraceError, TraceFinding, TraceResult};
pub use span::{Span, hex_id, parse_resource_spans, parse_spans, service_name_of};
pub use trace::{Trace, TraceBuild};
