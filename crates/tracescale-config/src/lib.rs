//! tracescale-config — per-deployment latency bounds.
//!
//! `LatencyBasedAutoScaler` documents are read from a directory of YAML
//! files by [`YamlConfigStore`] and kept current by [`ConfigWatcher`].

pub mod error;
pub mod resource;
pub mod store;
pub mod watcher;

pub use error::{ConfigError, ConfigResult};
pub use resource::{LatencyBound, LatencyThreshold, ScalerResource};
pub use store::{ConfigStore, YamlConfigStore};
pub use watcher::{ConfigChanges, ConfigWatcher};
