//! Payload translator (C2, §4.1): OpenAI chat-completion request -> upstream message
//! templates, grounded on `convert_openai_to_lmarena_payload` / `_process_openai_message`
//! in the original bridge, reshaped into typed `serde` request structs instead of
//! untyped dicts.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::store::catalog::ModelCatalog;
use crate::store::pool::{BattleTarget, Mode};
use crate::wire::{Attachment, MessageTemplate};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageUrl {
    url: String,
    /// Vision API's `detail` field, repurposed here to carry an optional original
    /// filename (§4.1 rule 3) — the caller's choice, not ours.
    detail: Option<String>,
}

/// Output of [`translate`]: everything the orchestrator needs besides the resolved
/// session/message IDs and the `isAuto` flag it fills in itself.
pub struct TranslatedPayload {
    pub message_templates: Vec<MessageTemplate>,
    pub target_model_id: String,
    pub assistant_prefill: Option<String>,
}

/// Applies the full §4.1 transform pipeline in order: role normalization, prefill
/// extraction, per-message split, empty-content floor, tavern mode, model resolution,
/// participant-position assignment, then bypass mode (appended *after* position
/// assignment so its sentinel turn always keeps position `a` regardless of mode — see
/// DESIGN.md for why this departs from the original's literal statement order).
pub fn translate(
    request: &ChatCompletionRequest,
    config: &AppConfig,
    catalog: &ModelCatalog,
    mode_override: Option<Mode>,
    battle_target_override: Option<BattleTarget>,
) -> TranslatedPayload {
    let mut messages = request.messages.clone();

    for msg in messages.iter_mut() {
        if msg.role == "developer" {
            msg.role = "system".to_string();
            info!("normalized message role: developer -> system");
        }
    }

    let assistant_prefill = if config.assistant_prefill_enabled {
        if messages.last().map(|m| m.role == "assistant").unwrap_or(false) {
            let prefill_msg = messages.pop().expect("just checked last() is Some");
            let (text, _) = extract_text_and_attachments(&prefill_msg.content);
            info!(preview = %truncate(&text, 50), "extracted assistant prefill");
            Some(text)
        } else {
            None
        }
    } else {
        if let Some(last) = messages.last_mut() {
            if last.role == "assistant" {
                last.role = "user".to_string();
                info!("assistant prefill disabled, converted trailing assistant message to user");
            }
        }
        None
    };

    let mut processed: Vec<MessageTemplate> = messages
        .iter()
        .map(|msg| process_message(msg))
        .collect();

    if config.tavern_mode_enabled {
        processed = apply_tavern_mode(processed);
    }

    if !catalog.contains(&request.model) {
        warn!(model = %request.model, "model not found in catalog, using default upstream ID");
    }
    let target_model_id = catalog.resolve(&request.model);

    let mode = mode_override.unwrap_or_else(|| parse_mode(&config.id_updater_last_mode));
    let target = battle_target_override.unwrap_or_else(|| parse_battle_target(&config.id_updater_battle_target));

    for msg in processed.iter_mut() {
        msg.position = participant_position(&msg.role, mode, target);
    }

    if config.bypass_enabled {
        processed.push(MessageTemplate {
            role: "user".to_string(),
            content: " ".to_string(),
            attachments: Vec::new(),
            position: "a".to_string(),
        });
    }

    TranslatedPayload {
        message_templates: processed,
        target_model_id,
        assistant_prefill,
    }
}

fn participant_position(role: &str, mode: Mode, target: BattleTarget) -> String {
    match (role, mode) {
        ("system", Mode::Battle) => target.as_lower().to_string(),
        ("system", Mode::DirectChat) => "b".to_string(),
        (_, Mode::Battle) => target.as_lower().to_string(),
        (_, Mode::DirectChat) => "a".to_string(),
    }
}

fn parse_mode(raw: &str) -> Mode {
    if raw == "battle" {
        Mode::Battle
    } else {
        Mode::DirectChat
    }
}

fn parse_battle_target(raw: &str) -> BattleTarget {
    if raw.eq_ignore_ascii_case("b") {
        BattleTarget::B
    } else {
        BattleTarget::A
    }
}

fn apply_tavern_mode(messages: Vec<MessageTemplate>) -> Vec<MessageTemplate> {
    let (system, other): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| m.role == "system");
    if system.is_empty() {
        return other;
    }
    let merged = system
        .into_iter()
        .map(|m| m.content)
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut result = vec![MessageTemplate {
        role: "system".to_string(),
        content: merged,
        attachments: Vec::new(),
        position: String::new(),
    }];
    result.extend(other);
    result
}

fn process_message(msg: &ChatMessage) -> MessageTemplate {
    let (mut text, attachments) = extract_text_and_attachments(&msg.content);

    if msg.role == "user" && text.trim().is_empty() {
        text = " ".to_string();
    }
    // assistant prefill for the *remaining* messages (not the extracted trailing one)
    // is left empty if empty, per §4.1 rule 4.

    MessageTemplate {
        role: msg.role.clone(),
        content: text,
        attachments,
        position: String::new(),
    }
}

/// Splits a content value (string, parts array, or null) into joined text plus any
/// `image_url` attachments whose URL is a `data:` URI. Non-data URLs are dropped with a
/// warning (§4.1 rule 3).
fn extract_text_and_attachments(content: &Value) -> (String, Vec<Attachment>) {
    match content {
        Value::String(s) => (s.clone(), Vec::new()),
        Value::Array(_) => {
            let parts: Vec<ContentPart> = serde_json::from_value(content.clone()).unwrap_or_default();
            let mut texts = Vec::new();
            let mut attachments = Vec::new();
            for part in parts {
                match part.kind.as_str() {
                    "text" => texts.push(part.text),
                    "image_url" => {
                        if let Some(image_url) = part.image_url {
                            if let Some(attachment) = build_attachment(&image_url) {
                                attachments.push(attachment);
                            }
                        }
                    }
                    _ => {}
                }
            }
            (texts.join("\n\n"), attachments)
        }
        _ => (String::new(), Vec::new()),
    }
}

fn build_attachment(image_url: &ImageUrl) -> Option<Attachment> {
    let url = &image_url.url;
    if !url.starts_with("data:") {
        warn!(url = %truncate(url, 60), "non-data image_url dropped, bridge cannot fetch external URLs");
        return None;
    }
    let content_type = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();

    let name = match image_url.detail.as_deref() {
        Some(original) if !original.is_empty() => original.to_string(),
        _ => synthesize_filename(&content_type),
    };

    info!(name = %name, "processed attachment");
    Some(Attachment {
        name,
        content_type,
        url: url.clone(),
    })
}

fn synthesize_filename(content_type: &str) -> String {
    let main_type = content_type.split('/').next().unwrap_or("application");
    let prefix = match main_type {
        "image" => "image",
        "audio" => "audio",
        _ => "file",
    };
    let extension = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .map(|e| e.to_string())
        .unwrap_or_else(|| {
            content_type
                .split('/')
                .nth(1)
                .filter(|sub| sub.len() < 20)
                .unwrap_or("bin")
                .to_string()
        });
    format!("{prefix}_{}.{extension}", Uuid::new_v4())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(role: &str, content: Value) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content,
        }
    }

    #[test]
    fn no_system_no_tavern_no_bypass_preserves_order() {
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![msg("user", json!("hi")), msg("assistant", json!("hello"))],
            stream: true,
        };
        let config = AppConfig::default();
        let catalog_path = std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4()));
        let catalog = ModelCatalog::load(&catalog_path);

        let result = translate(&request, &config, &catalog, None, None);
        // assistant message (last) becomes the prefill, not a template entry
        assert_eq!(result.message_templates.len(), 1);
        assert_eq!(result.message_templates[0].role, "user");
        assert_eq!(result.assistant_prefill.as_deref(), Some("hello"));
    }

    #[test]
    fn empty_user_content_becomes_single_space() {
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![msg("user", json!(""))],
            stream: true,
        };
        let config = AppConfig::default();
        let catalog = ModelCatalog::load(&std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4())));
        let result = translate(&request, &config, &catalog, None, None);
        assert_eq!(result.message_templates[0].content, " ");
    }

    #[test]
    fn tavern_mode_merges_system_messages_into_one_leading_turn() {
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![
                msg("system", json!("rule one")),
                msg("user", json!("hi")),
                msg("system", json!("rule two")),
            ],
            stream: true,
        };
        let mut config = AppConfig::default();
        config.tavern_mode_enabled = true;
        let catalog = ModelCatalog::load(&std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4())));
        let result = translate(&request, &config, &catalog, None, None);

        assert_eq!(result.message_templates[0].role, "system");
        assert!(result.message_templates[0].content.contains("rule one"));
        assert!(result.message_templates[0].content.contains("rule two"));
        assert_eq!(result.message_templates.len(), 2);
    }

    #[test]
    fn bypass_mode_sentinel_is_last_and_always_position_a() {
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![msg("user", json!("hi"))],
            stream: true,
        };
        let mut config = AppConfig::default();
        config.bypass_enabled = true;
        config.id_updater_last_mode = "battle".to_string();
        config.id_updater_battle_target = "B".to_string();
        let catalog = ModelCatalog::load(&std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4())));
        let result = translate(&request, &config, &catalog, None, None);

        let last = result.message_templates.last().unwrap();
        assert_eq!(last.content, " ");
        assert_eq!(last.position, "a");
    }

    #[test]
    fn battle_mode_assigns_target_position_to_non_system_messages() {
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![msg("system", json!("sys")), msg("user", json!("hi"))],
            stream: true,
        };
        let mut config = AppConfig::default();
        config.id_updater_last_mode = "battle".to_string();
        config.id_updater_battle_target = "B".to_string();
        let catalog = ModelCatalog::load(&std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4())));
        let result = translate(&request, &config, &catalog, None, None);

        assert_eq!(result.message_templates[0].position, "b");
        assert_eq!(result.message_templates[1].position, "b");
    }

    #[test]
    fn non_data_image_url_is_dropped() {
        let content = json!([
            {"type": "text", "text": "look"},
            {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
        ]);
        let request = ChatCompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            messages: vec![msg("user", content)],
            stream: true,
        };
        let config = AppConfig::default();
        let catalog = ModelCatalog::load(&std::env::temp_dir().join(format!("cat-{}.json", Uuid::new_v4())));
        let result = translate(&request, &config, &catalog, None, None);
        assert_eq!(result.message_templates[0].attachments.len(), 0);
        assert_eq!(result.message_templates[0].content, "look");
    }
}
