//! `POST /update_models` (§4.8, §6): accepts the raw HTML of the chat arena's page,
//! scrapes the embedded Next.js `initialState` model list out of it, and diffs the
//! result into the model catalog.
//!
//! Grounded on the original bridge's `extract_models_from_html` /
//! `compare_and_update_models`: the original walks `self.__next_f.push([1,"..."])`
//! script payloads, JSON-decodes the escaped string, and recursively searches for an
//! `initialState` array whose entries are dicts with a `publicName` key, building
//! `{publicName: id}`. This port skips the recursive JSON walk in favor of a pair of
//! regexes that pull `publicName`/`id` straight out of the object literals embedded in
//! the page source — functionally equivalent for the flat object shape the arena
//! actually emits, and far simpler than re-deriving a JSON path walker in Rust.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Extension;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::info;

use crate::error::BridgeError;
use crate::state::AppState;

pub fn router() -> Router {
    Router::new().route("/update_models", post(update_models))
}

/// `publicName` followed later by `id` within the same object literal.
static NAME_THEN_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""publicName"\s*:\s*"([^"]+)"[^{}]{0,400}?"id"\s*:\s*"([^"]+)""#).unwrap());

/// `id` followed later by `publicName` within the same object literal.
static ID_THEN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""id"\s*:\s*"([^"]+)"[^{}]{0,400}?"publicName"\s*:\s*"([^"]+)""#).unwrap());

async fn update_models(Extension(state): Extension<Arc<AppState>>, body: String) -> Response {
    match extract_models_from_html(&body) {
        Some(models) if !models.is_empty() => {
            let count = models.len();
            let updated = state.catalog.apply_update(models);
            info!(count, updated, "processed model catalog update");
            axum::Json(json!({
                "status": "success",
                "models_found": count,
                "catalog_updated": updated,
            }))
            .into_response()
        }
        _ => BridgeError::BadRequest("no model data (publicName/id pairs) found in submitted HTML".to_string()).into_response(),
    }
}

fn extract_models_from_html(html: &str) -> Option<HashMap<String, String>> {
    let mut models = HashMap::new();

    for cap in NAME_THEN_ID.captures_iter(html) {
        models.insert(cap[1].to_string(), cap[2].to_string());
    }
    for cap in ID_THEN_NAME.captures_iter(html) {
        models.entry(cap[2].to_string()).or_insert_with(|| cap[1].to_string());
    }

    if models.is_empty() {
        None
    } else {
        Some(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_to_id_pairs_regardless_of_key_order() {
        let html = r#"
            <script>self.__next_f.push([1,"...{\"publicName\":\"claude-3.5-sonnet\",\"id\":\"f44e280a-7914\"}..."]);</script>
            <script>{"id":"ab12-cd34","publicName":"gpt-4o"}</script>
        "#;
        let models = extract_models_from_html(html).expect("models found");
        assert_eq!(models.get("claude-3.5-sonnet").map(String::as_str), Some("f44e280a-7914"));
        assert_eq!(models.get("gpt-4o").map(String::as_str), Some("ab12-cd34"));
    }

    #[test]
    fn returns_none_for_html_without_model_data() {
        assert!(extract_models_from_html("<html><body>nothing here</body></html>").is_none());
    }
}
