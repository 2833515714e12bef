//! `/v1/chat/completions` (§4.5, §6): authenticates, resolves credentials, dispatches to
//! the browser via the multiplexer, then formats the orchestrator's events as either an
//! OpenAI SSE stream or a single aggregated JSON response.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::format::{self, CONTENT_FILTER_NOTICE};
use crate::orchestrator::{self, LoopEvent};
use crate::rotation::AUTO_CLAUDE_SENTINEL;
use crate::state::AppState;
use crate::store::api_keys::ApiKeyError;
use crate::store::pool::{BattleTarget, Mode};
use crate::translator::{self, ChatCompletionRequest};
use crate::wire::{OutboundMessage, UpstreamPayload};

pub fn router() -> Router {
    Router::new().route("/v1/chat/completions", post(chat_completions))
}

async fn chat_completions(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match handle(state, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

enum AuthOutcome {
    NotRequired,
    Global,
    Registry(String),
}

async fn handle(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> BridgeResult<Response> {
    state.touch_activity();
    state.reload_config();

    let request: ChatCompletionRequest =
        serde_json::from_slice(&body).map_err(|e| BridgeError::BadRequest(format!("invalid JSON body: {e}")))?;

    let config = state.config.read().clone();

    let auth = authenticate(&config, &state, &headers, &request.model)?;
    if let AuthOutcome::Registry(key) = &auth {
        state.api_keys.increment_usage(key);
    }

    if !state.multiplexer.is_connected() {
        return Err(BridgeError::BrowserDisconnected);
    }

    let request_id = Uuid::new_v4().to_string();
    let original_model = request.model.clone();
    let is_auto = original_model == AUTO_CLAUDE_SENTINEL;
    let current_model = if is_auto {
        let chosen = state.fallback.select(&state.catalog);
        state.fallback.track(&request_id, &chosen);
        info!(request_id, chosen = %chosen, "auto-claude selected model");
        chosen
    } else {
        original_model.clone()
    };

    let (session_id, message_id, mode_override, battle_target_override) =
        resolve_credentials(&state, &config, &current_model)?;

    let rx = state.multiplexer.register_channel(request_id.clone());

    let translated = translator::translate(&request, &config, &state.catalog, mode_override, battle_target_override);
    let prefill = translated.assistant_prefill.clone();

    let payload = UpstreamPayload {
        message_templates: translated.message_templates,
        target_model_id: translated.target_model_id,
        session_id,
        message_id,
        assistant_prefill: translated.assistant_prefill,
        is_auto,
    };

    if state
        .multiplexer
        .send(&OutboundMessage::dispatch(request_id.clone(), payload))
        .is_err()
    {
        state.multiplexer.remove_channel(&request_id);
        return Err(BridgeError::BrowserDisconnected);
    }

    let timeout = Duration::from_secs(config.stream_response_timeout_seconds);
    let (tx, loop_rx) = mpsc::channel(64);
    tokio::spawn(orchestrator::drive_request(
        state.clone(),
        rx,
        request_id.clone(),
        current_model.clone(),
        is_auto,
        timeout,
        tx,
    ));

    let response_model = if is_auto { original_model } else { current_model };

    if request.stream {
        Ok(stream_response(response_model, prefill, loop_rx))
    } else {
        Ok(aggregate_response(response_model, prefill, loop_rx).await)
    }
}

fn authenticate(config: &crate::config::AppConfig, state: &AppState, headers: &HeaderMap, model: &str) -> BridgeResult<AuthOutcome> {
    let auth_required = config.api_key.is_some() || !state.api_keys.is_empty();
    if !auth_required {
        return Ok(AuthOutcome::NotRequired);
    }

    let token = extract_bearer(headers).ok_or(BridgeError::AuthMissing)?;

    if let Some(global) = &config.api_key {
        if &token == global {
            return Ok(AuthOutcome::Global);
        }
    }

    state
        .api_keys
        .validate(&token, Some(model))
        .map(|_| AuthOutcome::Registry(token.clone()))
        .map_err(|e| match e {
            ApiKeyError::Missing | ApiKeyError::Invalid => BridgeError::AuthInvalid("invalid API key".to_string()),
            ApiKeyError::Disabled => BridgeError::AuthInvalid("API key is disabled".to_string()),
            ApiKeyError::UsageLimitExceeded => BridgeError::AuthInvalid("API key usage limit exceeded".to_string()),
            ApiKeyError::ModelNotAllowed(m) => BridgeError::ModelNotAllowed(m),
        })
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn resolve_credentials(
    state: &AppState,
    config: &crate::config::AppConfig,
    model: &str,
) -> BridgeResult<(String, String, Option<Mode>, Option<BattleTarget>)> {
    let (session_id, message_id, mode, target) = match state.pool.resolve(model) {
        Some(creds) => (creds.session_id, creds.message_id, creds.mode, creds.battle_target),
        None if config.use_default_ids_if_mapping_not_found => {
            let session_id = config.session_id.clone().ok_or_else(|| {
                BridgeError::UnresolvedCredentials(format!(
                    "model '{model}' has no credential pool entry and no global session_id is configured"
                ))
            })?;
            let message_id = config.message_id.clone().ok_or_else(|| {
                BridgeError::UnresolvedCredentials(format!(
                    "model '{model}' has no credential pool entry and no global message_id is configured"
                ))
            })?;
            (session_id, message_id, None, None)
        }
        None => {
            return Err(BridgeError::UnresolvedCredentials(format!(
                "model '{model}' has no credential pool entry and use_default_ids_if_mapping_not_found is disabled"
            )))
        }
    };

    let looks_like_placeholder = |s: &str| s.trim().is_empty() || s.contains("YOUR_");
    if looks_like_placeholder(&session_id) || looks_like_placeholder(&message_id) {
        return Err(BridgeError::UnresolvedCredentials(
            "resolved session/message IDs are empty or placeholders; run the external ID updater first".to_string(),
        ));
    }

    Ok((session_id, message_id, mode, target))
}

struct StreamState {
    rx: mpsc::Receiver<LoopEvent>,
    completion_id: String,
    model: String,
    pending: VecDeque<Event>,
    finish_reason: String,
    finished: bool,
}

fn stream_response(model: String, prefill: Option<String>, rx: mpsc::Receiver<LoopEvent>) -> Response {
    let completion_id = format::completion_id();
    let mut pending = VecDeque::new();
    if let Some(text) = prefill.filter(|t| !t.is_empty()) {
        let value = format::chunk(&text, &model, &completion_id);
        pending.push_back(Event::default().data(value.to_string()));
    }

    let state = StreamState {
        rx,
        completion_id,
        model,
        pending,
        finish_reason: "stop".to_string(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok::<Event, Infallible>(event), st));
            }
            if st.finished {
                return None;
            }

            match st.rx.recv().await {
                Some(LoopEvent::Content(text)) => {
                    let value = format::chunk(&text, &st.model, &st.completion_id);
                    st.pending.push_back(Event::default().data(value.to_string()));
                }
                Some(LoopEvent::Finish(reason)) => {
                    if reason == "content-filter" {
                        let value = format::chunk(CONTENT_FILTER_NOTICE, &st.model, &st.completion_id);
                        st.pending.push_back(Event::default().data(value.to_string()));
                    }
                    st.finish_reason = reason;
                }
                Some(LoopEvent::Error(err)) => {
                    let error_value = format::error_chunk(&err.to_string(), &st.model, &st.completion_id);
                    let finish_value = format::finish_chunk(&st.model, &st.completion_id, "stop");
                    st.pending.push_back(Event::default().data(error_value.to_string()));
                    st.pending.push_back(Event::default().data(finish_value.to_string()));
                    st.pending.push_back(Event::default().data("[DONE]"));
                    st.finished = true;
                }
                None => {
                    let finish_value = format::finish_chunk(&st.model, &st.completion_id, &st.finish_reason.clone());
                    st.pending.push_back(Event::default().data(finish_value.to_string()));
                    st.pending.push_back(Event::default().data("[DONE]"));
                    st.finished = true;
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn aggregate_response(model: String, prefill: Option<String>, mut rx: mpsc::Receiver<LoopEvent>) -> Response {
    let completion_id = format::completion_id();
    let mut content = prefill.unwrap_or_default();
    let mut finish_reason = "stop".to_string();

    while let Some(event) = rx.recv().await {
        match event {
            LoopEvent::Content(text) => content.push_str(&text),
            LoopEvent::Finish(reason) => {
                if reason == "content-filter" {
                    content.push_str(CONTENT_FILTER_NOTICE);
                }
                finish_reason = reason;
            }
            LoopEvent::Error(err) => return err.into_response(),
        }
    }

    let body = format::non_stream_response(&content, &model, &completion_id, &finish_reason);
    (StatusCode::OK, Json(body)).into_response()
}
