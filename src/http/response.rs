//! HTTP response helpers for standardized JSON error/success bodies, shared
//! by the admin interface and any ad hoc handler outside `AuthService`'s own
//! RFC 6749 error shape (`AuthService` has its own `ApiError`; this module
//! is for everything else).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HttpErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    code: u16,
}

/// Write a standardized `{error, message, code}` error response.
pub fn write_http_error(message: impl Into<String>, status: StatusCode) -> Response {
    let message = message.into();
    let response = HttpErrorResponse {
        error: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
        message: if message.is_empty() { None } else { Some(message) },
        code: status.as_u16(),
    };
    (status, Json(response)).into_response()
}

pub fn write_http_json<T: Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

/// Map a [`crate::error::GatewayError`] onto an HTTP status, logging the
/// full error internally but returning a message safe to expose — internal
/// errors never leak their detail into the response body.
pub fn error_response(err: crate::error::GatewayError) -> Response {
    use crate::error::GatewayError;

    let status = match &err {
        GatewayError::Validation(_) | GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::Unauthorized(_) | GatewayError::InvalidGrant(_) | GatewayError::InvalidState(_) => {
            StatusCode::UNAUTHORIZED
        }
        GatewayError::Forbidden(_) | GatewayError::UnauthorizedClient(_) | GatewayError::PolicyDenied { .. } => {
            StatusCode::FORBIDDEN
        }
        GatewayError::Storage(crate::error::StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Provider(_) | GatewayError::Network(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "internal error serving HTTP request");
        return write_http_error("an internal error occurred", status);
    }

    write_http_error(err.to_string(), status)
}

/// Wraps a [`crate::error::GatewayError`] so handlers can use `?` and
/// return it directly as an axum error type.
pub struct ApiErrorResponse(pub crate::error::GatewayError);

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        error_response(self.0)
    }
}

impl From<crate::error::GatewayError> for ApiErrorResponse {
    fn from(err: crate::error::GatewayError) -> Self {
        Self(err)
    }
}
