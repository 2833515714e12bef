//! Application configuration, loaded from a JSONC (JSON-with-comments) file on disk.
//!
//! Comments are stripped with a couple of regexes before handing the remainder to
//! `serde_json`, mirroring the original bridge's `config.jsonc` convention rather than
//! reaching for a TOML/YAML config crate the original format never used.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell_regex::comment_regexes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: String,
    pub port: u16,
    pub stream_response_timeout_seconds: u64,

    pub tavern_mode_enabled: bool,
    pub bypass_enabled: bool,
    pub assistant_prefill_enabled: bool,
    pub use_default_ids_if_mapping_not_found: bool,

    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub api_key: Option<String>,
    pub admin_password: Option<String>,

    pub api_keys_file: String,
    pub models_file: String,
    pub model_endpoint_map_file: String,

    pub enable_idle_restart: bool,
    /// Seconds of inactivity before a graceful restart; `-1` disables the check.
    pub idle_restart_timeout_seconds: i64,

    pub id_updater_last_mode: String,
    pub id_updater_battle_target: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            port: 4102,
            stream_response_timeout_seconds: 360,
            tavern_mode_enabled: false,
            bypass_enabled: false,
            assistant_prefill_enabled: true,
            use_default_ids_if_mapping_not_found: true,
            session_id: None,
            message_id: None,
            api_key: None,
            admin_password: None,
            api_keys_file: "api_keys.json".to_string(),
            models_file: "models.json".to_string(),
            model_endpoint_map_file: "model_endpoint_map.json".to_string(),
            enable_idle_restart: false,
            idle_restart_timeout_seconds: 300,
            id_updater_last_mode: "direct_chat".to_string(),
            id_updater_battle_target: "A".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, stripping `//` and `/* */` comments first. Falls back to defaults
    /// (and logs a warning) if the file is missing or fails to parse, matching the
    /// original bridge's "never refuse to boot over a bad config" behavior.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match strip_jsonc_comments(&raw).and_then(|stripped| {
                serde_json::from_str::<AppConfig>(&stripped).context("parsing config JSON")
            }) {
                Ok(cfg) => {
                    info!(path = %path.display(), "loaded configuration");
                    info!(
                        tavern_mode = cfg.tavern_mode_enabled,
                        bypass_mode = cfg.bypass_enabled,
                        assistant_prefill = cfg.assistant_prefill_enabled,
                        "active transform modes"
                    );
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    AppConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file not found, using defaults");
                AppConfig::default()
            }
        }
    }

    pub fn api_keys_path(&self) -> PathBuf {
        PathBuf::from(&self.api_keys_file)
    }

    pub fn models_path(&self) -> PathBuf {
        PathBuf::from(&self.models_file)
    }

    pub fn model_endpoint_map_path(&self) -> PathBuf {
        PathBuf::from(&self.model_endpoint_map_file)
    }
}

fn strip_jsonc_comments(raw: &str) -> Result<String> {
    let (line_re, block_re) = comment_regexes();
    let without_line_comments = line_re.replace_all(raw, "");
    let without_block_comments = block_re.replace_all(&without_line_comments, "");
    Ok(without_block_comments.into_owned())
}

/// Tiny local stand-in for a `once_cell`-memoized pair of regexes; kept in its own
/// module purely so `strip_jsonc_comments` above reads as a one-liner.
mod once_cell_regex {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[^\n]*").unwrap());
    static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

    pub fn comment_regexes() -> (&'static Regex, &'static Regex) {
        (&LINE_COMMENT, &BLOCK_COMMENT)
    }
}
