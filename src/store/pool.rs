//! Credential pool: per-model ordered session/message-ID pairs with a rotation cursor.
//!
//! Persisted as JSON on every mutation (coarse read-modify-write, §5) rather than through
//! any transactional store — mutations happen at rate-limit rate, not request rate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    DirectChat,
    Battle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BattleTarget {
    A,
    B,
}

impl BattleTarget {
    pub fn as_lower(&self) -> &'static str {
        match self {
            BattleTarget::A => "a",
            BattleTarget::B => "b",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPair {
    pub session_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub pairs: Vec<CredentialPair>,
    #[serde(default)]
    pub current_index: usize,
    pub mode: Option<Mode>,
    pub battle_target: Option<BattleTarget>,
}

impl PoolEntry {
    pub fn current(&self) -> Option<&CredentialPair> {
        self.pairs.get(self.current_index)
    }
}

/// Resolved session/message IDs plus any per-model mode override, returned by a lookup.
pub struct ResolvedCredentials {
    pub session_id: String,
    pub message_id: String,
    pub mode: Option<Mode>,
    pub battle_target: Option<BattleTarget>,
}

/// Outcome of attempting to rotate a model's credential pair.
#[derive(Debug, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated { from: usize, to: usize },
    SingleEndpoint,
    UnknownModel,
}

pub struct CredentialPoolStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl CredentialPoolStore {
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(path = %path.display(), error = %e, "failed to parse credential pool, starting empty");
                HashMap::new()
            }),
            Err(_) => {
                warn!(path = %path.display(), "credential pool file not found, starting empty");
                HashMap::new()
            }
        };
        info!(models = entries.len(), "loaded credential pool");
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, PoolEntry>) {
        match serde_json::to_string_pretty(entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    error!(path = %self.path.display(), error = %e, "failed to persist credential pool");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize credential pool"),
        }
    }

    pub fn resolve(&self, model: &str) -> Option<ResolvedCredentials> {
        let entries = self.entries.read();
        let entry = entries.get(model)?;
        let pair = entry.current()?;
        Some(ResolvedCredentials {
            session_id: pair.session_id.clone(),
            message_id: pair.message_id.clone(),
            mode: entry.mode,
            battle_target: entry.battle_target,
        })
    }

    /// Advances `model`'s rotation cursor to the next pair, modulo the pool size, and
    /// persists the change. A pool with 0 or 1 pairs cannot usefully rotate.
    pub fn rotate(&self, model: &str) -> RotationOutcome {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(model) else {
            return RotationOutcome::UnknownModel;
        };
        if entry.pairs.len() <= 1 {
            return RotationOutcome::SingleEndpoint;
        }
        let from = entry.current_index;
        let to = (from + 1) % entry.pairs.len();
        entry.current_index = to;
        info!(model, from, to, "rotated credential pool");
        self.persist(&entries);
        RotationOutcome::Rotated { from, to }
    }

    #[cfg(test)]
    pub fn insert_for_test(&self, model: &str, entry: PoolEntry) {
        self.entries.write().insert(model.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool_path() -> PathBuf {
        std::env::temp_dir().join(format!("pool-test-{}.json", uuid::Uuid::new_v4()))
    }

    fn pair(session: &str, message: &str) -> CredentialPair {
        CredentialPair {
            session_id: session.to_string(),
            message_id: message.to_string(),
        }
    }

    #[test]
    fn rotate_advances_index_modulo_pool_size_and_persists() {
        let path = temp_pool_path();
        let store = CredentialPoolStore::load(&path);
        store.insert_for_test(
            "claude-opus-4-20250514",
            PoolEntry {
                pairs: vec![pair("s1", "m1"), pair("s2", "m2")],
                current_index: 0,
                mode: None,
                battle_target: None,
            },
        );

        let outcome = store.rotate("claude-opus-4-20250514");
        assert_eq!(outcome, RotationOutcome::Rotated { from: 0, to: 1 });

        let resolved = store.resolve("claude-opus-4-20250514").expect("resolves after rotation");
        assert_eq!(resolved.session_id, "s2");
        assert_eq!(resolved.message_id, "m2");

        let reloaded = CredentialPoolStore::load(&path);
        let resolved_reloaded = reloaded
            .resolve("claude-opus-4-20250514")
            .expect("persisted pool resolves after reload");
        assert_eq!(resolved_reloaded.session_id, "s2");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rotate_with_single_pair_is_a_no_op() {
        let path = temp_pool_path();
        let store = CredentialPoolStore::load(&path);
        store.insert_for_test(
            "claude-3-5-sonnet-20241022",
            PoolEntry {
                pairs: vec![pair("only-s", "only-m")],
                current_index: 0,
                mode: None,
                battle_target: None,
            },
        );

        assert_eq!(store.rotate("claude-3-5-sonnet-20241022"), RotationOutcome::SingleEndpoint);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rotate_unknown_model_reports_unknown() {
        let store = CredentialPoolStore::load(&temp_pool_path());
        assert_eq!(store.rotate("no-such-model"), RotationOutcome::UnknownModel);
    }
}
