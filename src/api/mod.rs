// HTTP API routers

pub mod billing;
pub mod credentials;

pub use billing::{create_billing_router, BillingAppState};
pub use credentials::{create_credential_router, CredentialAppState};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Error payload returned to clients. Internal failures carry a generic
/// message; diagnostics stay in server-side logs.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types shared by the API routers
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Extract the caller's user id from the Authorization header.
///
/// Expected format: "Authorization: Bearer <user token>". The token is
/// the marketplace session token, which doubles as the user id here;
/// session lookup belongs to the outer platform.
pub fn extract_user_id(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| AppError::Unauthorized("Authorization token not provided".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid authorization header".to_string()))?;

    let mut parts = auth_header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();

    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::Unauthorized(
            "Invalid authorization token format".to_string(),
        ));
    }

    Ok(token.to_string())
}
