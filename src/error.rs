use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Every fallible path through the bridge funnels into one of these variants so that
/// handlers can `?` their way through auth, translation and upstream I/O and let this
/// type own the HTTP status mapping instead of re-deriving it at each call site.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("API key required")]
    AuthMissing,

    #[error("{0}")]
    AuthInvalid(String),

    #[error("model '{0}' not permitted for this API key")]
    ModelNotAllowed(String),

    #[error("{0}")]
    UnresolvedCredentials(String),

    #[error("browser userscript is not connected")]
    BrowserDisconnected,

    #[error("{0}")]
    AttachmentTooLarge(String),

    #[error("{0}")]
    CloudflareChallenge(String),

    #[error("{0}")]
    UpstreamError(String),

    #[error("response timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    fn status(&self) -> StatusCode {
        match self {
            BridgeError::AuthMissing | BridgeError::AuthInvalid(_) | BridgeError::ModelNotAllowed(_) => {
                StatusCode::UNAUTHORIZED
            }
            BridgeError::UnresolvedCredentials(_) | BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::BrowserDisconnected => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::AttachmentTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            BridgeError::CloudflareChallenge(_)
            | BridgeError::UpstreamError(_)
            | BridgeError::Timeout(_)
            | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code, mirrored into the non-streaming JSON error body.
    fn code(&self) -> &'static str {
        match self {
            BridgeError::AuthMissing | BridgeError::AuthInvalid(_) => "invalid_api_key",
            BridgeError::ModelNotAllowed(_) => "model_not_allowed",
            BridgeError::UnresolvedCredentials(_) => "unresolved_credentials",
            BridgeError::BrowserDisconnected => "browser_disconnected",
            BridgeError::AttachmentTooLarge(_) => "attachment_too_large",
            BridgeError::CloudflareChallenge(_) => "cloudflare_challenge",
            BridgeError::UpstreamError(_) => "processing_error",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::BadRequest(_) => "bad_request",
            BridgeError::NotImplemented(_) => "not_implemented",
            BridgeError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": format!("[Bridge]: {}", self),
                "type": "bridge_error",
                "code": self.code(),
            }
        }));
        (status, body).into_response()
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
