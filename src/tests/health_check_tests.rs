use reqwest::StatusCode;
use serde_json::Value;

use super::spawn_app;

#[tokio::test]
async fn health_check_reports_degraded_without_browser() {
    let app_address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{app_address}/api/health"))
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = response.json::<Value>().await.expect("failed to parse health response");
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["browser_connected"], false);
}

#[tokio::test]
async fn chat_completion_without_browser_connection_returns_service_unavailable() {
    let app_address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{app_address}/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "claude-3.5-sonnet",
            "messages": [{"role": "user", "content": "hello"}],
        }))
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response.json::<Value>().await.expect("failed to parse error response");
    assert_eq!(body["error"]["code"], "browser_disconnected");
}

#[tokio::test]
async fn admin_login_rejects_when_no_password_configured() {
    let app_address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{app_address}/admin/login"))
        .json(&serde_json::json!({"password": "anything"}))
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_keys_endpoint_requires_bearer_token() {
    let app_address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{app_address}/admin/api/keys"))
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_models_rejects_html_with_no_model_data() {
    let app_address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{app_address}/update_models"))
        .body("<html><body>nothing here</body></html>")
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
