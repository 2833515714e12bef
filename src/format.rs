//! OpenAI-shaped JSON builders for chat-completion responses, grounded on
//! `format_openai_chunk`/`format_openai_finish_chunk`/`format_openai_error_chunk`/
//! `format_openai_non_stream_response` in the original bridge.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub const CONTENT_FILTER_NOTICE: &str =
    "\n\nThe response was terminated, likely due to a context limit or internal content filtering.";

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

pub fn chunk(content: &str, model: &str, id: &str) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": Value::Null}],
    })
}

pub fn finish_chunk(model: &str, id: &str, reason: &str) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}],
    })
}

pub fn error_chunk(message: &str, model: &str, id: &str) -> Value {
    chunk(&format!("\n\n[Bridge Error]: {message}"), model, id)
}

pub fn non_stream_response(content: &str, model: &str, id: &str, reason: &str) -> Value {
    let approx_tokens = (content.len() / 4) as u64;
    json!({
        "id": id,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": reason,
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": approx_tokens,
            "total_tokens": approx_tokens,
        },
    })
}
