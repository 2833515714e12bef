//! API-key registry: opaque key string -> usage metadata and model allow-list (§3).
//!
//! A single global key, configured separately in [`crate::config::AppConfig`], bypasses
//! this registry entirely with full access and is never counted against a usage cap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Empty means "all models allowed".
    #[serde(default)]
    pub models: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiKeyFile {
    #[serde(default)]
    api_keys: HashMap<String, ApiKeyRecord>,
}

#[derive(Debug)]
pub enum ApiKeyError {
    Missing,
    Invalid,
    Disabled,
    UsageLimitExceeded,
    ModelNotAllowed(String),
}

pub struct ApiKeyRegistry {
    path: PathBuf,
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl ApiKeyRegistry {
    pub fn load(path: &Path) -> Self {
        let keys = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<ApiKeyFile>(&raw)
                .map(|f| f.api_keys)
                .unwrap_or_else(|e| {
                    error!(path = %path.display(), error = %e, "failed to parse API key registry, starting empty");
                    HashMap::new()
                }),
            Err(_) => {
                warn!(path = %path.display(), "API key registry not found, starting empty");
                HashMap::new()
            }
        };
        info!(keys = keys.len(), "loaded API key registry");
        let registry = Self {
            path: path.to_path_buf(),
            keys: RwLock::new(keys),
        };
        if !path.exists() {
            registry.persist();
        }
        registry
    }

    fn persist(&self) {
        let file = ApiKeyFile {
            api_keys: self.keys.read().clone(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    error!(path = %self.path.display(), error = %e, "failed to persist API key registry");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize API key registry"),
        }
    }

    /// Validates `key` against this registry only (the caller checks the global key
    /// first, since that one bypasses the registry and never increments usage).
    pub fn validate(&self, key: &str, model: Option<&str>) -> Result<ApiKeyRecord, ApiKeyError> {
        let keys = self.keys.read();
        let record = keys.get(key).ok_or(ApiKeyError::Invalid)?;
        if !record.enabled {
            return Err(ApiKeyError::Disabled);
        }
        if let Some(limit) = record.usage_limit {
            if record.usage_count >= limit {
                return Err(ApiKeyError::UsageLimitExceeded);
            }
        }
        if let Some(model) = model {
            if !record.models.is_empty() && !record.models.iter().any(|m| m == model) {
                return Err(ApiKeyError::ModelNotAllowed(model.to_string()));
            }
        }
        Ok(record.clone())
    }

    pub fn models_for(&self, key: &str) -> Option<Vec<String>> {
        self.keys.read().get(key).map(|r| r.models.clone())
    }

    pub fn increment_usage(&self, key: &str) {
        let mut keys = self.keys.write();
        if let Some(record) = keys.get_mut(key) {
            record.usage_count += 1;
            record.last_used_at = Some(Utc::now());
        }
        drop(keys);
        self.persist();
    }

    pub fn list(&self) -> Vec<ApiKeyRecord> {
        self.keys.read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    pub fn create(&self, name: String, description: Option<String>, usage_limit: Option<u64>, models: Vec<String>) -> (String, ApiKeyRecord) {
        let key = generate_key();
        let record = ApiKeyRecord {
            id: key.clone(),
            name,
            description,
            usage_limit,
            usage_count: 0,
            enabled: true,
            models,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.keys.write().insert(key.clone(), record.clone());
        self.persist();
        (key, record)
    }

    pub fn update(&self, key: &str, mutate: impl FnOnce(&mut ApiKeyRecord)) -> bool {
        let found = {
            let mut keys = self.keys.write();
            match keys.get_mut(key) {
                Some(record) => {
                    mutate(record);
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist();
        }
        found
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.keys.write().remove(key).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Appends `model` to every key's allow-list that doesn't already grant it
    /// (an empty allow-list already grants everything, so those are left alone).
    pub fn bulk_add_model(&self, model: &str) -> usize {
        let mut count = 0;
        {
            let mut keys = self.keys.write();
            for record in keys.values_mut() {
                if !record.models.is_empty() && !record.models.iter().any(|m| m == model) {
                    record.models.push(model.to_string());
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.persist();
        }
        count
    }
}

fn generate_key() -> String {
    let timestamp = Utc::now().timestamp();
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let random_part = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("sk-{}-{}", timestamp % 1_000_000, random_part)
}
