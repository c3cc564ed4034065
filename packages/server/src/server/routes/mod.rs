pub mod admin;
pub mod disputes;
pub mod escrows;
pub mod health;
pub mod wallets;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::common::CoreError;

/// Map the error taxonomy onto HTTP. Money-moving endpoints either return a
/// definitive success or one of these definitive failures; provider detail
/// never leaves the server.
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::InsufficientFunds { .. }
            | CoreError::WalletUnavailable { .. }
            | CoreError::LimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::CircuitOpen { .. } | CoreError::ProviderTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CoreError::Provider { .. } => StatusCode::BAD_GATEWAY,
            CoreError::Database(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Internal detail stays out of 5xx bodies.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({ "error": { "code": self.code(), "message": message } })),
        )
            .into_response()
    }
}
