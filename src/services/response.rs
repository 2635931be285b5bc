//! HTTP response building helpers
//!
//! Every handler answers with JSON. Errors use `{"error": "..."}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::ChallengeError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message }),
    )
}

/// 409 for a spent daily budget
pub fn limit_reached(max_attempts: u32, attempts_used: u32) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::CONFLICT,
        &serde_json::json!({
            "error": format!("Maximum attempts ({}) reached for today", max_attempts),
            "maxAttempts": max_attempts,
            "attemptsUsed": attempts_used,
        }),
    )
}

/// Convert a ChallengeError to an appropriate HTTP response
pub fn error_response(error: ChallengeError) -> Response<Full<Bytes>> {
    let (status, message) = match &error {
        ChallengeError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        ChallengeError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        ChallengeError::Json(e) => (StatusCode::BAD_REQUEST, format!("JSON error: {}", e)),
        ChallengeError::TransientStore(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        ChallengeError::InvariantViolation(_) => {
            error!(alert = true, error = %error, "Invariant violation reached HTTP layer");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, ChallengeError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}
