use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Router};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod multiplexer;
pub mod orchestrator;
pub mod parser;
pub mod rotation;
pub mod routes;
pub mod state;
pub mod store;
pub mod translator;
pub mod wire;

use crate::cli::Cli;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "arena_bridge=info".into()))
                .and_then(tracing_subscriber::fmt::layer()),
        )
        .init();

    if dotenvy::dotenv().is_err() {
        info!(".env file not found, using environment variables directly if set");
    }

    let cli = Cli::parse();
    let state = Arc::new(AppState::load(cli.config));
    info!("application state loaded");

    tokio::spawn(lifecycle::run(state.clone()));

    let app = Router::new()
        .merge(routes::chat::router())
        .merge(routes::models::router())
        .merge(routes::ws::router())
        .merge(routes::admin::router())
        .merge(routes::catalog_update::router())
        .merge(routes::images::router())
        .merge(routes::internal::router())
        .merge(routes::health::router())
        .layer(Extension(state.clone()));

    let port = state.config.read().port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "arena-bridge listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

#[cfg(test)]
mod tests;
