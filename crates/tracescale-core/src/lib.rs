pub mod config;
pub mod duration;
pub mod types;

pub use config::{
    ConfigValidationError, MAX_TREE_HEIGHT, ModelConfig, ModelerConfig, SamplerConfig,
    TraceScaleConfig,
};
pub use duration::parse_duration;
pub use types::*;
