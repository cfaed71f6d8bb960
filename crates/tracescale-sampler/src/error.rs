use tracescale_backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("training data insufficient: requested {requested} traces, received {received}")]
    TrainingDataInsufficient { requested: usize, received: usize },

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<BackendError> for SamplerError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InsufficientResults {
                requested,
                received,
            } => SamplerError::TrainingDataInsufficient {
                requested,
                received,
            },
            other => SamplerError::Backend(other),
        }
    }
}

impl From<tonic::transport::Error> for SamplerError {
    fn from(e: tonic::transport::Error) -> Self {
        SamplerError::Transport(e.to_string())
    }
}

pub type SamplerResult<T> = Result<T, SamplerError>;
