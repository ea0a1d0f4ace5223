//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to proxy callers.
///
/// The variants map onto the error taxonomy the proxy exposes:
/// caller input errors become 400s, capacity exhaustion becomes 503,
/// upstream transport failures become 502, and anything unexpected is
/// a 500. Upstream application errors (4xx/5xx bodies) are relayed
/// verbatim by the forwarder and never pass through this type.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing or empty API keys: {0}")]
    MissingApiKeys(String),

    #[error("No available API key")]
    NoAvailableKey,

    #[error("Upstream request failed: {0}")]
    BadGateway(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ProxyError::MissingApiKeys(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                msg,
            ),
            ProxyError::NoAvailableKey => (
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_error",
                "No available API key".to_string(),
            ),
            ProxyError::BadGateway(msg) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                msg,
            ),
            ProxyError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "api_error",
                err.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                type_: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}
