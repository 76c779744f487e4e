//! Request-facing error type for the HTTP/WebSocket front door.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error(transparent)]
    Core(#[from] taskforge_core::Error),
}

impl GatewayError {
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    /// HTTP status this error should render as.
    pub fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            GatewayError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Core(taskforge_core::Error::Validation(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Core(taskforge_core::Error::NotFound { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
