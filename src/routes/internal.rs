//! `POST /internal/start_id_capture` (§4.7, §6): tells the connected browser userscript
//! to start watching the page for a fresh session/message ID pair, for the external ID
//! updater tool. Grounded on the original bridge's `/internal/start_id_capture`
//! handler, including its 503-when-disconnected behavior.

use std::sync::Arc;

use axum::extract::Extension;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::json;

use crate::error::BridgeError;
use crate::state::AppState;
use crate::wire::OutboundMessage;

pub fn router() -> Router {
    Router::new().route("/internal/start_id_capture", post(start_id_capture))
}

async fn start_id_capture(Extension(state): Extension<Arc<AppState>>) -> Response {
    if !state.multiplexer.is_connected() {
        return BridgeError::BrowserDisconnected.into_response();
    }
    match state.multiplexer.send(&OutboundMessage::activate_id_capture()) {
        Ok(()) => axum::Json(json!({
            "status": "success",
            "message": "ID capture activated, switch models in the browser to capture new IDs",
        }))
        .into_response(),
        Err(_) => BridgeError::BrowserDisconnected.into_response(),
    }
}
