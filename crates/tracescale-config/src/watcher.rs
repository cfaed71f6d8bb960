//! Polling hot-reload of the configuration directory.
//!
//! Each tick fingerprints the YAML files (path → mtime) and reloads the
//! store when a file was created, modified or deleted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::store::{ConfigStore, yaml_files};

type Fingerprint = BTreeMap<PathBuf, SystemTime>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub created: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Polls the scaler spec directory and reloads the store on change.
pub struct ConfigWatcher {
    store: Arc<dyn ConfigStore>,
    dir: PathBuf,
    interval: Duration,
    last: Fingerprint,
}

impl ConfigWatcher {
    pub fn new(store: Arc<dyn ConfigStore>, dir: impl Into<PathBuf>, interval: Duration) -> Self {
        let dir = dir.into();
        let last = fingerprint(&dir);
        Self {
            store,
            dir,
            interval,
            last,
        }
    }

    /// Compare against the previous fingerprint and reload on any change.
    pub fn poll_once(&mut self) -> ConfigChanges {
        let current = fingerprint(&self.dir);
        let changes = diff(&self.last, &current);
        self.last = current;

        if changes.is_empty() {
            return changes;
        }

        for path in &changes.created {
            info!(path = %path.display(), "configuration file created, reloading");
        }
        for path in &changes.modified {
            info!(path = %path.display(), "configuration file modified, reloading");
        }
        for path in &changes.deleted {
            info!(path = %path.display(), "configuration file deleted, reloading");
        }
        if let Err(e) = self.store.reload() {
            warn!(error = %e, "configuration reload failed");
        }
        changes
    }

    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            dir = %self.dir.display(),
            interval_secs = self.interval.as_secs(),
            "config watcher started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.poll_once();
                }
                _ = shutdown.changed() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }
}

fn fingerprint(dir: &Path) -> Fingerprint {
    if !dir.is_dir() {
        return Fingerprint::new();
    }
    let files = match yaml_files(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "config directory scan failed");
            return Fingerprint::new();
        }
    };
    files
        .into_iter()
        .filter_map(|path| {
            let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((path, mtime))
        })
        .collect()
}

fn diff(old: &Fingerprint, new: &Fingerprint) -> ConfigChanges {
    let mut changes = ConfigChanges::default();
    for (path, mtime) in new {
        match old.get(path) {
            None => changes.created.push(path.clone()),
            Some(prev) if prev != mtime => changes.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.deleted.push(path.clone());
        }
    }
    changes
}
