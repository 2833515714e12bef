//! Integration test harness: spins up the real router against a throwaway state
//! directory, binding a random port and driving the server with a plain `reqwest`
//! client instead of calling handlers in-process.

pub mod health_check_tests;

use std::sync::Arc;

use axum::{Extension, Router};
use tokio::net::TcpListener;

use crate::routes;
use crate::state::AppState;

/// Spawns the full application router on a random local port and returns its base URL.
/// Each call gets its own temp config path, so `AppState::load` starts from defaults
/// with no pool/catalog/key entries and nothing persisted between tests.
pub async fn spawn_app() -> String {
    let config_path = std::env::temp_dir().join(format!("arena-bridge-it-{}.jsonc", uuid::Uuid::new_v4()));
    let state = Arc::new(AppState::load(config_path));

    let app = Router::new()
        .merge(routes::chat::router())
        .merge(routes::models::router())
        .merge(routes::ws::router())
        .merge(routes::admin::router())
        .merge(routes::catalog_update::router())
        .merge(routes::images::router())
        .merge(routes::internal::router())
        .merge(routes::health::router())
        .layer(Extension(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    format!("http://{addr}")
}
