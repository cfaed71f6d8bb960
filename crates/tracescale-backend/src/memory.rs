//! Backend holding traces in memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracescale_proto::trace::TracesData;

use crate::error::{BackendError, BackendResult};
use crate::{TimeRange, TraceBackend};

/// Traces keyed by hex id. Search ignores the time range and query and
/// returns ids in key order.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    traces: RwLock<BTreeMap<String, TracesData>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trace_id: impl Into<String>, data: TracesData) {
        self.traces.write().insert(trace_id.into(), data);
    }

    pub fn len(&self) -> usize {
        self.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.read().is_empty()
    }
}

#[async_trait]
impl TraceBackend for InMemoryBackend {
    async fn get_trace_by_id(&self, trace_id: &str) -> BackendResult<TracesData> {
        self.traces
            .read()
            .get(trace_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(trace_id.to_string()))
    }

    async fn search_traces(
        &self,
        _range: TimeRange,
        limit: usize,
        _query: &str,
    ) -> BackendResult<Vec<String>> {
        let ids: Vec<String> = self.traces.read().keys().take(limit).cloned().collect();
        if ids.len() < limit {
            return Err(BackendError::InsufficientResults {
                requested: limit,
                received: ids.len(),
            });
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lookup_and_search() {
        let backend = InMemoryBackend::new();
        backend.insert("aa", TracesData::default());
        backend.insert("bb", TracesData::default());

        assert!(backend.get_trace_by_id("aa").await.is_ok());
        assert!(matches!(
            backend.get_trace_by_id("cc").await,
            Err(BackendError::NotFound(_))
        ));

        let range = TimeRange::last(Duration::from_secs(60));
        assert_eq!(backend.search_traces(range, 2, "").await.unwrap(), vec!["aa", "bb"]);
        assert!(matches!(
            backend.search_traces(range, 3, "").await,
            Err(BackendError::InsufficientResults { requested: 3, received: 2 })
        ));
    }
}
