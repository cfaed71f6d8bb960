//! tracescale-backend — the tracing backend collaborator.
//!
//! Full traces are stored outside this system. The modeler fetches them
//! by id after the sampler announces an interesting trace, and the sampler
//! searches for a bulk of recent traces to pretrain its model.

pub mod error;
pub mod memory;
pub mod tempo;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracescale_proto::trace::TracesData;

pub use error::{BackendError, BackendResult};
pub use memory::InMemoryBackend;
pub use tempo::TempoBackend;

/// Query used for pretraining searches: traces that have a root service.
pub const ROOT_SERVICE_QUERY: &str = r#"{trace:rootService != ""}"#;

/// Seconds held back from "now" so the backend has ingested the window.
const SEARCH_END_LAG_SECS: u64 = 20;

/// Inclusive search window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_unix_secs: u64,
    pub end_unix_secs: u64,
}

impl TimeRange {
    /// The `delta` before a point slightly in the past.
    pub fn last(delta: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let end = now.saturating_sub(SEARCH_END_LAG_SECS);
        Self {
            start_unix_secs: end.saturating_sub(delta.as_secs()),
            end_unix_secs: end,
        }
    }
}

#[async_trait]
pub trait TraceBackend: Send + Sync {
    /// Fetch every span of a trace.
    async fn get_trace_by_id(&self, trace_id: &str) -> BackendResult<TracesData>;

    /// Ids of traces matching `query` within `range`. Fails with
    /// [`BackendError::InsufficientResults`] when fewer than `limit` match.
    async fn search_traces(
        &self,
        range: TimeRange,
        limit: usize,
        query: &str,
    ) -> BackendResult<Vec<String>>;
}
