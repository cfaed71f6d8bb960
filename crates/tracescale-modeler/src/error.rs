use tonic::{Code, Status};
use tracescale_backend::BackendError;
use tracescale_model::TraceError;

/// Why a subscription to the sampler ended.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsumerError {
    /// The sampler is temporarily unreachable; reconnect after a delay.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Any other stream failure.
    #[error("upstream terminal error ({code}): {message}")]
    UpstreamTerminal { code: String, message: String },
}

impl ConsumerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsumerError::UpstreamUnavailable(_))
    }
}

impl From<Status> for ConsumerError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Unavailable => ConsumerError::UpstreamUnavailable(status.message().to_string()),
            code => ConsumerError::UpstreamTerminal {
                code: format!("{code:?}"),
                message: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::transport::Error> for ConsumerError {
    fn from(e: tonic::transport::Error) -> Self {
        ConsumerError::UpstreamUnavailable(e.to_string())
    }
}

/// Why a single notification was skipped.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to fetch trace {trace_id}: {source}")]
    BackendFetch {
        trace_id: String,
        #[source]
        source: BackendError,
    },

    #[error("malformed trace: {0}")]
    MalformedTrace(#[from] TraceError),

    #[error("processing queue closed")]
    QueueClosed,
}

pub type ProcessResult<T> = Result<T, ProcessError>;
