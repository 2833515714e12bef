//! Model catalog: external model name -> upstream model ID. Reloadable at runtime via
//! the `/update_models` HTML-scrape endpoint (§4.8); may be empty, in which case a
//! hard-coded default upstream ID stands in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{error, info, warn};

/// Claude 3.5 Sonnet's upstream ID, used whenever a requested model has no catalog entry.
pub const DEFAULT_MODEL_ID: &str = "f44e280a-7914-43ca-a25d-ecfcc5d48d09";

pub struct ModelCatalog {
    path: PathBuf,
    models: RwLock<HashMap<String, String>>,
}

impl ModelCatalog {
    pub fn load(path: &Path) -> Self {
        let models = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(path = %path.display(), error = %e, "failed to parse model catalog, starting empty");
                HashMap::new()
            }),
            Err(_) => {
                warn!(path = %path.display(), "model catalog file not found, starting empty");
                HashMap::new()
            }
        };
        info!(models = models.len(), "loaded model catalog");
        Self {
            path: path.to_path_buf(),
            models: RwLock::new(models),
        }
    }

    pub fn resolve(&self, model_name: &str) -> String {
        self.models
            .read()
            .get(model_name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.models.read().contains_key(model_name)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    pub fn lookup_name_by_id(&self, id: &str) -> Option<String> {
        self.models
            .read()
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.clone())
    }

    /// Diffs `new_models` against the in-memory catalog, logs additions/removals/ID
    /// changes, and persists + reloads when anything actually changed. Returns whether
    /// the catalog was updated.
    pub fn apply_update(&self, new_models: HashMap<String, String>) -> bool {
        let mut current = self.models.write();

        let old_names: std::collections::HashSet<_> = current.keys().cloned().collect();
        let new_names: std::collections::HashSet<_> = new_models.keys().cloned().collect();

        let added: Vec<_> = new_names.difference(&old_names).cloned().collect();
        let removed: Vec<_> = old_names.difference(&new_names).cloned().collect();
        let mut changed = Vec::new();
        for name in old_names.intersection(&new_names) {
            if current.get(name) != new_models.get(name) {
                changed.push(name.clone());
            }
        }

        if added.is_empty() && removed.is_empty() && changed.is_empty() {
            info!("model catalog unchanged");
            return false;
        }

        for name in &added {
            info!(model = name, id = %new_models[name], "model added to catalog");
        }
        for name in &removed {
            info!(model = name, "model removed from catalog");
        }
        for name in &changed {
            info!(model = name, old = %current[name], new = %new_models[name], "model ID changed");
        }

        *current = new_models;
        if let Ok(json) = serde_json::to_string_pretty(&*current) {
            if let Err(e) = std::fs::write(&self.path, json) {
                error!(error = %e, "failed to persist model catalog");
            }
        }
        true
    }
}
