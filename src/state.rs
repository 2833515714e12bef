//! Explicit, `Arc`-wrapped application state (§3, §9 "Global mutable singletons"):
//! replaces the original's process-level globals with one struct threaded through axum's
//! `Extension` layer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::AppConfig;
use crate::multiplexer::Multiplexer;
use crate::rotation::AutoFallback;
use crate::store::admin_sessions::AdminSessions;
use crate::store::api_keys::ApiKeyRegistry;
use crate::store::catalog::ModelCatalog;
use crate::store::pool::CredentialPoolStore;

pub struct AppState {
    pub config: RwLock<AppConfig>,
    config_path: PathBuf,

    pub pool: CredentialPoolStore,
    pub catalog: ModelCatalog,
    pub api_keys: ApiKeyRegistry,
    pub admin_sessions: AdminSessions,
    pub multiplexer: Multiplexer,
    pub fallback: AutoFallback,

    /// Unix seconds of the last authenticated chat/image call, read by the idle
    /// supervisor (C7). An atomic rather than a lock since it's written on every
    /// request's hot path and read once every 10s by the poller.
    last_activity: AtomicI64,
}

impl AppState {
    pub fn load(config_path: PathBuf) -> Self {
        let config = AppConfig::load(&config_path);
        let pool = CredentialPoolStore::load(&config.model_endpoint_map_path());
        let catalog = ModelCatalog::load(&config.models_path());
        let api_keys = ApiKeyRegistry::load(&config.api_keys_path());

        Self {
            config: RwLock::new(config),
            config_path,
            pool,
            catalog,
            api_keys,
            admin_sessions: AdminSessions::new(),
            multiplexer: Multiplexer::new(),
            fallback: AutoFallback::new(),
            last_activity: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    /// Re-reads the config file from disk, mirroring the original's per-request
    /// `load_config()` call so an operator's edits take effect without a restart.
    pub fn reload_config(&self) {
        let fresh = AppConfig::load(&self.config_path);
        *self.config.write() = fresh;
    }

    pub fn touch_activity(&self) {
        self.last_activity.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn idle_seconds(&self) -> i64 {
        Utc::now().timestamp() - self.last_activity.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir().join(format!("arena-bridge-test-{}.jsonc", uuid::Uuid::new_v4()))
    }

    #[test]
    fn load_falls_back_to_defaults_when_files_are_absent() {
        let state = AppState::load(temp_config_path());
        assert_eq!(state.config.read().port, 4102);
        assert!(!state.multiplexer.is_connected());
    }

    #[test]
    fn touch_activity_resets_idle_seconds() {
        let state = AppState::load(temp_config_path());
        state.last_activity.store(0, Ordering::Relaxed);
        assert!(state.idle_seconds() > 0);
        state.touch_activity();
        assert!(state.idle_seconds() < 2);
    }
}
