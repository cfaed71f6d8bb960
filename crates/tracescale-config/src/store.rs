//! Configuration collaborator backed by a directory of YAML files.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::resource::{LATENCY_SCALER_KIND, LatencyThreshold, ScalerResource};

/// Read access to per-deployment scaling resources.
pub trait ConfigStore: Send + Sync {
    /// Bounds for the resource whose deployment name equals `resource`.
    fn latency_threshold(&self, resource: &str) -> ConfigResult<LatencyThreshold>;

    /// Deployment names of every loaded resource.
    fn all_resources(&self) -> Vec<String>;

    /// First deployment name starting with `resource`.
    fn target_deployment(&self, resource: &str) -> ConfigResult<String>;

    /// Full document of the first resource whose deployment starts with `resource`.
    fn resource_config(&self, resource: &str) -> ConfigResult<ScalerResource>;

    /// Re-read the backing source.
    fn reload(&self) -> ConfigResult<()>;
}

/// Loads every `LatencyBasedAutoScaler` document from `*.yaml`/`*.yml` files
/// in a directory. Other kinds are ignored; a file that fails to parse is
/// logged and skipped.
pub struct YamlConfigStore {
    dir: PathBuf,
    resources: RwLock<Vec<ScalerResource>>,
}

impl YamlConfigStore {
    /// Load `dir`. A missing directory yields an empty store.
    pub fn open(dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let store = Self {
            dir: dir.into(),
            resources: RwLock::new(Vec::new()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Build a store from an in-memory multi-document YAML string.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let resources = parse_documents(Path::new("<memory>"), content)?;
        Ok(Self {
            dir: PathBuf::new(),
            resources: RwLock::new(resources),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn find(&self, pred: impl Fn(&ScalerResource) -> bool) -> Option<ScalerResource> {
        self.resources.read().iter().find(|r| pred(r)).cloned()
    }
}

impl ConfigStore for YamlConfigStore {
    fn latency_threshold(&self, resource: &str) -> ConfigResult<LatencyThreshold> {
        self.find(|r| r.deployment_name() == resource)
            .ok_or_else(|| ConfigError::ResourceNotFound(resource.to_string()))?
            .latency_threshold()
    }

    fn all_resources(&self) -> Vec<String> {
        self.resources
            .read()
            .iter()
            .map(|r| r.deployment_name().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    fn target_deployment(&self, resource: &str) -> ConfigResult<String> {
        self.resource_config(resource)
            .map(|r| r.deployment_name().to_string())
    }

    fn resource_config(&self, resource: &str) -> ConfigResult<ScalerResource> {
        self.find(|r| r.deployment_name().starts_with(resource))
            .ok_or_else(|| ConfigError::ResourceNotFound(resource.to_string()))
    }

    fn reload(&self) -> ConfigResult<()> {
        if !self.dir.is_dir() {
            warn!(dir = %self.dir.display(), "config directory not found");
            self.resources.write().clear();
            return Ok(());
        }

        let mut files = yaml_files(&self.dir)?;
        files.sort();

        let mut loaded = Vec::new();
        for path in files {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            match parse_documents(&path, &content) {
                Ok(mut resources) => loaded.append(&mut resources),
                Err(e) => warn!(error = %e, "skipping config file"),
            }
        }

        info!(
            dir = %self.dir.display(),
            resources = loaded.len(),
            "configuration loaded"
        );
        *self.resources.write() = loaded;
        Ok(())
    }
}

/// `*.yaml` and `*.yml` files directly inside `dir`.
pub(crate) fn yaml_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn parse_documents(path: &Path, content: &str) -> ConfigResult<Vec<ScalerResource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) != Some(LATENCY_SCALER_KIND) {
            debug!(path = %path.display(), "ignoring document of another kind");
            continue;
        }
        let resource: ScalerResource =
            serde_yaml::from_value(value).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        resources.push(resource);
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &str = r#"
apiVersion: scale.io/v1
kind: LatencyBasedAutoScaler
metadata:
  name: frontend-scaler
spec:
  target:
    deploymentName: frontend-v2
  latencyThreshold:
    upperBound: 200ms
    lowerBound: 50ms
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: unrelated
---
kind: LatencyBasedAutoScaler
spec:
  target:
    deploymentName: checkout
  latencyThreshold:
    upperBound: 1s
    lowerBound: 100ms
"#;

    #[test]
    fn loads_directory_and_filters_kinds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scalers.yaml"), SPECS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let store = YamlConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.all_resources(), vec!["frontend-v2", "checkout"]);

        let threshold = store.latency_threshold("checkout").unwrap();
        assert_eq!(threshold.upper_ms(), 1000.0);
        assert_eq!(threshold.lower_ms(), 100.0);
    }

    #[test]
    fn threshold_is_exact_but_target_is_prefix() {
        let store = YamlConfigStore::from_yaml_str(SPECS).unwrap();

        assert!(matches!(
            store.latency_threshold("frontend"),
            Err(ConfigError::ResourceNotFound(_))
        ));
        assert_eq!(store.target_deployment("frontend").unwrap(), "frontend-v2");
        assert_eq!(
            store.resource_config("front").unwrap().metadata.unwrap().name,
            "frontend-scaler"
        );
        assert!(matches!(
            store.target_deployment("payments"),
            Err(ConfigError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlConfigStore::open(dir.path().join("absent")).unwrap();
        assert!(store.all_resources().is_empty());
    }

    #[test]
    fn broken_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), SPECS).unwrap();
        std::fs::write(dir.path().join("b.yml"), "kind: [unterminated").unwrap();

        let store = YamlConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.all_resources().len(), 2);
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalers.yaml");
        std::fs::write(&path, SPECS).unwrap();
        let store = YamlConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.all_resources().len(), 2);

        std::fs::remove_file(&path).unwrap();
        store.reload().unwrap();
        assert!(store.all_resources().is_empty());
    }
}
