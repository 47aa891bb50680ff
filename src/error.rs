use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid transition: {event} not allowed from {from}")]
    InvalidTransition { from: String, event: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cancellation requires a reason")]
    MissingReason,

    #[error("online payment not confirmed")]
    PaymentNotConfirmed,

    #[error("routing provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Unauthorized(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::MissingReason => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::PaymentNotConfirmed => (StatusCode::PAYMENT_REQUIRED, self.to_string()),
            AppError::ProviderUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
