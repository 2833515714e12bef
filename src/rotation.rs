//! Rotation & auto-fallback engine (C5, §4.4): per-model credential rotation on a
//! detected rate limit, and the `auto-claude` priority-list fallback state machine.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::store::catalog::ModelCatalog;

pub const AUTO_CLAUDE_SENTINEL: &str = "auto-claude";

/// High-to-low priority list walked by [`AutoFallback::select`].
pub const AUTO_CLAUDE_PRIORITY: &[&str] = &[
    "claude-opus-4-1-20250805-thinking-16k",
    "claude-opus-4-1-20250805",
    "claude-opus-4-20250514-thinking-16k",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-sonnet-4-20250514",
    "claude-3-5-sonnet-20241022",
];

/// True iff `content` carries the upstream's inline rate-limit sidechannel: the literal
/// substrings `429` and `Too Many Requests` both present (§4.2). Scoped to a single
/// helper so both the buffer-level and decoded-fragment-level checks in the parser use
/// identical logic.
pub fn looks_like_rate_limit(content: &str) -> bool {
    content.contains("429") && content.contains("Too Many Requests")
}

/// Builds the user-facing assistant turn shown after a per-model rotation attempt.
pub fn rotation_message(model_name: &str, rotated: bool) -> String {
    if rotated {
        format!(
            "🔄 **Rotation Activated**\n\n\
            The current endpoint for model '{model_name}' hit its rate limit. I've automatically \
            rotated to the next available endpoint.\n\n\
            **Please resend your previous message to continue the conversation.**"
        )
    } else {
        format!(
            "⚠️ **Rate Limit Detected**\n\n\
            I detected a rate limit for model '{model_name}', but there are no additional \
            endpoints configured to rotate to automatically.\n\n\
            **Recommendations:**\n\
            - Wait a few minutes before retrying\n\
            - Consider adding more backup session IDs for this model"
        )
    }
}

/// Cooldown (model -> expiry) and active-auto (request ID -> current real model)
/// tables, §3. Both are scoped to rate-limit-event lifetimes and live in `AppState`.
pub struct AutoFallback {
    cooldowns: DashMap<String, DateTime<Utc>>,
    active: DashMap<String, String>,
}

impl AutoFallback {
    pub fn new() -> Self {
        Self {
            cooldowns: DashMap::new(),
            active: DashMap::new(),
        }
    }

    fn is_cooled_down(&self, model: &str) -> bool {
        match self.cooldowns.get(model) {
            Some(expiry) if Utc::now() <= *expiry => true,
            Some(_) => {
                self.cooldowns.remove(model);
                false
            }
            None => false,
        }
    }

    /// Walks [`AUTO_CLAUDE_PRIORITY`], skipping cooled-down or catalog-absent models.
    /// Falls back to the lowest-priority model if every candidate is cooled down.
    pub fn select(&self, catalog: &ModelCatalog) -> String {
        for &model in AUTO_CLAUDE_PRIORITY {
            if !self.is_cooled_down(model) && catalog.contains(model) {
                return model.to_string();
            }
        }
        AUTO_CLAUDE_PRIORITY
            .last()
            .expect("priority list is non-empty")
            .to_string()
    }

    pub fn cool_down(&self, model: &str) {
        self.cooldowns.insert(model.to_string(), Utc::now() + Duration::hours(1));
    }

    pub fn track(&self, request_id: &str, model: &str) {
        self.active.insert(request_id.to_string(), model.to_string());
    }

    pub fn current_model(&self, request_id: &str) -> Option<String> {
        self.active.get(request_id).map(|v| v.clone())
    }

    pub fn clear(&self, request_id: &str) {
        self.active.remove(request_id);
    }
}

impl Default for AutoFallback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_rate_limit_requires_both_substrings() {
        assert!(looks_like_rate_limit("429 Too Many Requests from upstream"));
        assert!(!looks_like_rate_limit("429 only"));
        assert!(!looks_like_rate_limit("Too Many Requests only"));
    }

    #[test]
    fn select_skips_cooled_down_models() {
        let catalog_path = std::env::temp_dir().join(format!("models-{}.json", uuid::Uuid::new_v4()));
        let models: std::collections::HashMap<String, String> = AUTO_CLAUDE_PRIORITY
            .iter()
            .map(|m| (m.to_string(), format!("id-{m}")))
            .collect();
        std::fs::write(&catalog_path, serde_json::to_string(&models).unwrap()).unwrap();
        let catalog = ModelCatalog::load(&catalog_path);

        let fallback = AutoFallback::new();
        let first = fallback.select(&catalog);
        assert_eq!(first, AUTO_CLAUDE_PRIORITY[0]);

        fallback.cool_down(AUTO_CLAUDE_PRIORITY[0]);
        let second = fallback.select(&catalog);
        assert_eq!(second, AUTO_CLAUDE_PRIORITY[1]);

        std::fs::remove_file(&catalog_path).ok();
    }

    #[test]
    fn select_forces_last_model_when_all_cooled_down() {
        let catalog_path = std::env::temp_dir().join(format!("models-{}.json", uuid::Uuid::new_v4()));
        let models: std::collections::HashMap<String, String> = AUTO_CLAUDE_PRIORITY
            .iter()
            .map(|m| (m.to_string(), format!("id-{m}")))
            .collect();
        std::fs::write(&catalog_path, serde_json::to_string(&models).unwrap()).unwrap();
        let catalog = ModelCatalog::load(&catalog_path);

        let fallback = AutoFallback::new();
        for model in AUTO_CLAUDE_PRIORITY {
            fallback.cool_down(model);
        }
        assert_eq!(fallback.select(&catalog), *AUTO_CLAUDE_PRIORITY.last().unwrap());

        std::fs::remove_file(&catalog_path).ok();
    }
}
