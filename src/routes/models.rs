//! `/v1/models` (§4.6): OpenAI-compatible model listing, filtered to whatever an
//! authenticated caller's API key allows. Unlike `/v1/chat/completions`, a lookup here
//! never increments a key's usage counter.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::error::{BridgeError, BridgeResult};
use crate::routes::chat::extract_bearer;
use crate::rotation::AUTO_CLAUDE_SENTINEL;
use crate::state::AppState;

pub fn router() -> Router {
    Router::new().route("/v1/models", get(list_models))
}

async fn list_models(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    match handle(state, headers).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: Arc<AppState>, headers: HeaderMap) -> BridgeResult<Response> {
    let mut names = state.catalog.names();
    if names.is_empty() {
        return Err(BridgeError::BadRequest(
            "the model catalog is empty; run the models updater first".to_string(),
        ));
    }
    names.push(AUTO_CLAUDE_SENTINEL.to_string());

    let config = state.config.read().clone();
    let auth_required = config.api_key.is_some() || !state.api_keys.is_empty();

    let allowed = if !auth_required {
        names
    } else {
        let token = extract_bearer(&headers).ok_or(BridgeError::AuthMissing)?;
        let is_global = config.api_key.as_deref() == Some(token.as_str());
        if is_global {
            names
        } else {
            let record_models = state
                .api_keys
                .models_for(&token)
                .ok_or_else(|| BridgeError::AuthInvalid("invalid API key".to_string()))?;
            if record_models.is_empty() {
                // An empty allow-list on the record means "all models".
                names
            } else {
                record_models.into_iter().filter(|m| names.contains(m)).collect()
            }
        }
    };

    let created = Utc::now().timestamp();
    let data = allowed
        .into_iter()
        .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "arena-bridge"}))
        .collect::<Vec<_>>();

    Ok(Json(json!({"object": "list", "data": data})).into_response())
}
