//! FHIR error responses.
//!
//! Errors leaving FHIR-facing routes are rendered as an `OperationOutcome`.
//! The token and registration endpoints use the RFC 6749 body instead, see
//! [`oauth_error_response`].

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;
use crate::oauth::TokenErrorResponse;

const REALM: &str = "smartgate";

// =============================================================================
// OperationOutcome rendering
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let diagnostics = if self.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = operation_outcome_json(issue_code(&self), self.oauth_error_code(), &diagnostics);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json"),
        );
        if status == StatusCode::UNAUTHORIZED
            && let Ok(value) = HeaderValue::from_str(&www_authenticate(
                self.oauth_error_code(),
                &diagnostics,
            ))
        {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }

        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status for an error on a FHIR-facing route.
#[must_use]
pub fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidClient { .. }
        | AuthError::InvalidToken { .. }
        | AuthError::Unauthorized { .. }
        | AuthError::TokenExpired
        | AuthError::TokenRevoked => StatusCode::UNAUTHORIZED,
        AuthError::InvalidScope { .. } | AuthError::Forbidden { .. } | AuthError::Policy { .. } => {
            StatusCode::FORBIDDEN
        }
        AuthError::InvalidGrant { .. }
        | AuthError::PkceVerificationFailed
        | AuthError::InvalidRequest { .. }
        | AuthError::UnsupportedResponseType { .. }
        | AuthError::UnsupportedGrantType { .. }
        | AuthError::InvalidClientMetadata { .. } => StatusCode::BAD_REQUEST,
        AuthError::NotFound { .. } => StatusCode::NOT_FOUND,
        AuthError::Conflict { .. } => StatusCode::CONFLICT,
        AuthError::IdempotencyMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::KeySource { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// FHIR `IssueType` code.
fn issue_code(error: &AuthError) -> &'static str {
    match error {
        AuthError::TokenExpired => "expired",
        AuthError::InvalidClient { .. }
        | AuthError::InvalidToken { .. }
        | AuthError::Unauthorized { .. }
        | AuthError::TokenRevoked => "security",
        AuthError::InvalidScope { .. } | AuthError::Forbidden { .. } | AuthError::Policy { .. } => {
            "forbidden"
        }
        AuthError::UnsupportedResponseType { .. } | AuthError::UnsupportedGrantType { .. } => {
            "not-supported"
        }
        AuthError::NotFound { .. } => "not-found",
        AuthError::Conflict { .. } | AuthError::IdempotencyMismatch { .. } => "conflict",
        AuthError::InvalidGrant { .. }
        | AuthError::PkceVerificationFailed
        | AuthError::InvalidRequest { .. }
        | AuthError::InvalidClientMetadata { .. } => "invalid",
        AuthError::KeySource { .. } => "transient",
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            "exception"
        }
    }
}

fn www_authenticate(error: &str, description: &str) -> String {
    let escaped = description.replace('"', "\\\"");
    format!("Bearer realm=\"{REALM}\", error=\"{error}\", error_description=\"{escaped}\"")
}

/// A single-issue `OperationOutcome`.
#[must_use]
pub fn operation_outcome_json(code: &str, oauth_error: &str, diagnostics: &str) -> serde_json::Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": code,
            "details": {
                "coding": [{
                    "system": "https://tools.ietf.org/html/rfc6749",
                    "code": oauth_error
                }]
            },
            "diagnostics": diagnostics
        }]
    })
}

// =============================================================================
// RFC 6749 rendering
// =============================================================================

/// `{error, error_description}` with `Cache-Control: no-store`.
#[must_use]
pub fn oauth_error_response(error: &AuthError) -> Response {
    if error.is_server_error() {
        tracing::error!(error = %error, "OAuth request failed");
    }
    let status = StatusCode::from_u16(TokenErrorResponse::status_for(error))
        .unwrap_or(StatusCode::BAD_REQUEST);
    let mut response = (status, Json(TokenErrorResponse::from(error))).into_response();
    let headers = response.headers_mut();
    no_store(headers);
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"smartgate\""),
        );
    }
    response
}

/// Adds `Cache-Control: no-store` and `Pragma: no-cache`.
pub fn no_store(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}
