//! Dynamic watches
//!
//! SpecialResourceModules may ask to be reconciled whenever a value
//! inside some other object changes. The shared state maps each watched
//! resource to its JSONPaths, and each path to the last value seen and
//! the modules interested in it. Watch tasks feed events in; requeues
//! come out on a channel consumed by the module controller.

use crate::error::ControllerError;
use crds::WatchedResource;
use futures::channel::mpsc::UnboundedSender;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Identity of a watched resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchKey {
    /// `group/version` or `version`
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Object name, every object when unset
    pub name: Option<String>,
    /// Object namespace, cluster-wide when unset
    pub namespace: Option<String>,
}

impl From<&WatchedResource> for WatchKey {
    fn from(watch: &WatchedResource) -> Self {
        Self {
            api_version: watch.api_version.clone(),
            kind: watch.kind.clone(),
            name: watch.name.clone().filter(|n| !n.is_empty()),
            namespace: watch.namespace.clone().filter(|n| !n.is_empty()),
        }
    }
}

impl WatchKey {
    /// Whether an object is the one this key watches
    pub fn matches(&self, object: &Value) -> bool {
        let meta = &object["metadata"];
        self.name.as_deref().is_none_or(|n| meta["name"].as_str() == Some(n))
            && self
                .namespace
                .as_deref()
                .is_none_or(|ns| meta["namespace"].as_str() == Some(ns))
    }
}

#[derive(Debug, Default)]
struct PathEntry {
    /// Distinct values last observed, `None` until the first event
    last: Option<Vec<String>>,
    modules: BTreeSet<String>,
}

type WatchState = BTreeMap<WatchKey, BTreeMap<String, PathEntry>>;

/// Values selected by a JSONPath: strings as-is, other scalars rendered,
/// sorted and deduplicated
pub fn extract(path: &str, object: &Value) -> Result<Vec<String>, ControllerError> {
    let path = JsonPath::parse(path).map_err(|e| ControllerError::InvalidConfig(format!("invalid JSONPath {}: {}", path, e)))?;
    let mut values: Vec<String> = path
        .query(object)
        .all()
        .into_iter()
        .flat_map(|node| match node {
            Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>(),
            other => vec![scalar(other)],
        })
        .collect();
    values.sort();
    values.dedup();
    Ok(values)
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shared dynamic watch registry
#[derive(Debug, Default)]
pub struct DynamicWatches {
    state: Mutex<WatchState>,
    new_resources: Option<UnboundedSender<WatchKey>>,
    requeues: Option<UnboundedSender<String>>,
}

impl DynamicWatches {
    /// Registry with no watch tasks behind it
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry announcing new resources and emitting requeues on channels
    pub fn connected(new_resources: UnboundedSender<WatchKey>, requeues: UnboundedSender<String>) -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
            new_resources: Some(new_resources),
            requeues: Some(requeues),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WatchState>, ControllerError> {
        self.state
            .lock()
            .map_err(|e| ControllerError::Watch(format!("watch state poisoned: {}", e)))
    }

    /// Makes `module` watch exactly `watches`.
    ///
    /// Returns the resources nobody watched before; they are also
    /// announced to the watch task spawner.
    pub fn register(&self, module: &str, watches: &[WatchedResource]) -> Result<Vec<WatchKey>, ControllerError> {
        for watch in watches {
            JsonPath::parse(&watch.path)
                .map_err(|e| ControllerError::InvalidConfig(format!("invalid JSONPath {}: {}", watch.path, e)))?;
        }
        let wanted: BTreeSet<(WatchKey, String)> = watches
            .iter()
            .map(|w| (WatchKey::from(w), w.path.clone()))
            .collect();

        let mut added = Vec::new();
        {
            let mut state = self.lock()?;
            Self::drop_module(&mut state, module, &wanted);
            for (key, path) in wanted {
                if !state.contains_key(&key) {
                    added.push(key.clone());
                }
                state
                    .entry(key)
                    .or_default()
                    .entry(path)
                    .or_default()
                    .modules
                    .insert(module.to_string());
            }
        }

        for key in &added {
            info!("Watching {} {} for module {}", key.api_version, key.kind, module);
            if let Some(tx) = &self.new_resources {
                if tx.unbounded_send(key.clone()).is_err() {
                    warn!("Watch spawner is gone, {} {} will not be watched", key.api_version, key.kind);
                }
            }
        }
        Ok(added)
    }

    /// Forgets every watch of `module`
    pub fn unregister(&self, module: &str) -> Result<(), ControllerError> {
        let mut state = self.lock()?;
        Self::drop_module(&mut state, module, &BTreeSet::new());
        Ok(())
    }

    fn drop_module(state: &mut WatchState, module: &str, keep: &BTreeSet<(WatchKey, String)>) {
        for (key, paths) in state.iter_mut() {
            for (path, entry) in paths.iter_mut() {
                if !keep.contains(&(key.clone(), path.clone())) {
                    entry.modules.remove(module);
                }
            }
            paths.retain(|_, entry| !entry.modules.is_empty());
        }
        state.retain(|_, paths| !paths.is_empty());
    }

    /// Whether anybody still watches the resource
    pub fn is_watched(&self, key: &WatchKey) -> bool {
        self.lock().is_ok_and(|state| state.contains_key(key))
    }

    /// Resources currently watched
    pub fn watched(&self) -> Vec<WatchKey> {
        self.lock().map(|state| state.keys().cloned().collect()).unwrap_or_default()
    }

    /// Feeds one observed object in, returning the modules to requeue.
    ///
    /// Values are compared as sets; the first observation of a path counts
    /// as a change.
    pub fn observe(&self, key: &WatchKey, object: &Value) -> Result<Vec<String>, ControllerError> {
        if !key.matches(object) {
            return Ok(Vec::new());
        }
        let mut requeue = BTreeSet::new();
        {
            let mut state = self.lock()?;
            let Some(paths) = state.get_mut(key) else {
                return Ok(Vec::new());
            };
            for (path, entry) in paths.iter_mut() {
                let values = match extract(path, object) {
                    Ok(values) => values,
                    Err(e) => {
                        warn!("Skipping {} on {} {}: {}", path, key.api_version, key.kind, e);
                        continue;
                    }
                };
                if entry.last.as_ref() == Some(&values) {
                    continue;
                }
                debug!("{} {} changed at {}: {:?}", key.kind, key.name.as_deref().unwrap_or("*"), path, values);
                entry.last = Some(values);
                requeue.extend(entry.modules.iter().cloned());
            }
        }

        let requeue: Vec<String> = requeue.into_iter().collect();
        if let Some(tx) = &self.requeues {
            for module in &requeue {
                if tx.unbounded_send(module.clone()).is_err() {
                    warn!("Module controller is gone, dropping requeue of {}", module);
                }
            }
        }
        Ok(requeue)
    }
}
