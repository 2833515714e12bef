//! Wire types shared by the multiplexer (C4) and the stream parser (C3): the untyped
//! shapes the browser userscript sends and receives over the duplex socket (§4.2, §9
//! "Dynamic JSON shapes" design note).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of inbound traffic for a single request ID, as sent by the browser.
///
/// The upstream's own wire format is untyped JSON; this narrows it to a tagged sum at
/// the socket boundary so nothing downstream has to re-inspect raw `Value`s.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    List(Vec<String>),
    Done,
    Control(ControlFrame),
}

#[derive(Debug, Clone, Default)]
pub struct ControlFrame {
    pub error: Option<String>,
    pub rate_limit_detected: bool,
    pub model_id: Option<String>,
    pub original_error: Option<String>,
}

impl Frame {
    /// Decodes the `data` field of an inbound `{request_id, data}` browser message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) if s == "[DONE]" => Frame::Done,
            Value::String(s) => Frame::Text(s),
            Value::Array(items) => Frame::List(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::Object(map) => {
                let rate_limit_detected = map
                    .get("rate_limit_detected")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let model_id = map.get("model_id").and_then(Value::as_str).map(str::to_string);
                let original_error = map
                    .get("original_error")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let error = map.get("error").map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                Frame::Control(ControlFrame {
                    error,
                    rate_limit_detected,
                    model_id,
                    original_error,
                })
            }
            other => Frame::Text(other.to_string()),
        }
    }
}

/// Inbound envelope from the browser: `{request_id, data}`.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub request_id: String,
    pub data: Value,
}

/// Outbound payload describing one upstream request, mirroring §4.1's translator output.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamPayload {
    #[serde(rename = "messageTemplates")]
    pub message_templates: Vec<MessageTemplate>,
    #[serde(rename = "targetModelId")]
    pub target_model_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "assistantPrefill", skip_serializing_if = "Option::is_none")]
    pub assistant_prefill: Option<String>,
    #[serde(rename = "isAuto")]
    pub is_auto: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageTemplate {
    pub role: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Participant position, `"a"` or `"b"` (§4.1 rule 7).
    pub position: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub url: String,
}

/// One outbound message to the browser. Untagged so the wire shape matches §6 exactly:
/// request dispatches serialize as `{request_id, payload}`, commands as `{command, ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Dispatch {
        request_id: String,
        payload: UpstreamPayload,
    },
    Reconnect {
        command: &'static str,
    },
    Refresh {
        command: &'static str,
    },
    ActivateIdCapture {
        command: &'static str,
    },
    SwitchModel {
        command: &'static str,
        request_id: String,
        new_session_id: String,
        new_message_id: String,
        new_model_id: String,
    },
}

impl OutboundMessage {
    pub fn dispatch(request_id: String, payload: UpstreamPayload) -> Self {
        OutboundMessage::Dispatch { request_id, payload }
    }

    pub fn reconnect() -> Self {
        OutboundMessage::Reconnect { command: "reconnect" }
    }

    pub fn refresh() -> Self {
        OutboundMessage::Refresh { command: "refresh" }
    }

    pub fn activate_id_capture() -> Self {
        OutboundMessage::ActivateIdCapture {
            command: "activate_id_capture",
        }
    }

    pub fn switch_model(request_id: String, new_session_id: String, new_message_id: String, new_model_id: String) -> Self {
        OutboundMessage::SwitchModel {
            command: "switch_model",
            request_id,
            new_session_id,
            new_message_id,
            new_model_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_done_sentinel() {
        assert!(matches!(Frame::from_value(json!("[DONE]")), Frame::Done));
    }

    #[test]
    fn decodes_rate_limit_control_frame() {
        let value = json!({"rate_limit_detected": true, "model_id": "abc"});
        match Frame::from_value(value) {
            Frame::Control(c) => {
                assert!(c.rate_limit_detected);
                assert_eq!(c.model_id.as_deref(), Some("abc"));
            }
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[test]
    fn switch_model_serializes_with_command_tag() {
        let msg = OutboundMessage::switch_model(
            "req-1".into(),
            "sess".into(),
            "msg".into(),
            "model-id".into(),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["command"], "switch_model");
        assert_eq!(json["request_id"], "req-1");
    }
}
