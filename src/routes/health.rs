//! `GET /api/health` (§6): liveness/readiness probe. Reports whether the browser
//! multiplexer slot is occupied and whether the model catalog loaded any models, without
//! requiring auth. No database ping here — this bridge's durable state is flat JSON
//! files, not a document store.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    browser_connected: bool,
    models_loaded: usize,
}

pub fn router() -> Router {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let browser_connected = state.multiplexer.is_connected();
    let models_loaded = state.catalog.names().len();

    let status = if browser_connected { "ok" } else { "degraded" };
    let code = if browser_connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(HealthStatus {
            status,
            browser_connected,
            models_loaded,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_degraded_when_browser_not_connected() {
        let path = std::env::temp_dir().join(format!("health-test-{}.jsonc", uuid::Uuid::new_v4()));
        let state = Arc::new(AppState::load(path));
        let response = health_check(Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
