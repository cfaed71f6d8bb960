//! Error types for trace construction.

use thiserror::Error;

/// Result type alias for trace model operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Fatal trace construction failures. The trace is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("malformed trace {0}: no root span")]
    NoRootSpan(String),

    #[error("malformed trace {0}: no spans")]
    EmptyTrace(String),
}

/// Non-fatal integrity problems found while building a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceFinding {
    /// More than one parentless span; `kept` became the root.
    MultipleRoots { kept: String, ignored: Vec<String> },
    /// The span's parent is not part of the trace.
    OrphanSpan { span_id: String, parent_span_id: String },
    /// A second span arrived with an id already in the trace.
    DuplicateSpan { span_id: String },
}

impl std::fmt::Display for TraceFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceFinding::MultipleRoots { kept, ignored } => {
                write!(f, "multiple root spans, kept {kept}, ignored {}", ignored.join(","))
            }
            TraceFinding::OrphanSpan {
                span_id,
                parent_span_id,
            } => write!(f, "span {span_id} references missing parent {parent_span_id}"),
            TraceFinding::DuplicateSpan { span_id } => write!(f, "duplicate span id {span_id}"),
        }
    }
}
