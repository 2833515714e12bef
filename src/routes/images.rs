//! `POST /v1/images/generations` (§4.9, §6): image generation passthrough.
//!
//! The original bridge treats this exactly like a chat completion for activity-tracking
//! purposes, touching the same idle-activity timestamp before doing anything else. The
//! actual generation pipeline is out of scope here (§4.9 Non-goals) — the bridge has no
//! image-capable upstream wired in, so it reports this honestly instead of pretending.

use std::sync::Arc;

use axum::extract::Extension;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use crate::error::BridgeError;
use crate::state::AppState;

pub fn router() -> Router {
    Router::new().route("/v1/images/generations", post(images_generations))
}

async fn images_generations(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.touch_activity();
    BridgeError::NotImplemented("image generation is not supported by this bridge".to_string()).into_response()
}
