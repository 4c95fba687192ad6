//! Token introspection (RFC 7662) and revocation (RFC 7009).

use axum::{
    Form, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::middleware::oauth_error_response;
use crate::services::AuthServices;
use crate::token::IntrospectionResponse;

/// Form body shared by both endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub token: String,

    /// `access_token` or `refresh_token`. Advisory only.
    #[serde(default)]
    pub token_type_hint: Option<String>,
}

/// `POST /auth/introspect`.
///
/// Always 200 for a present token: anything invalid, expired or revoked
/// is `{"active": false}`.
pub async fn introspect_handler(
    State(services): State<AuthServices>,
    Form(form): Form<TokenForm>,
) -> Response {
    if form.token.is_empty() {
        return oauth_error_response(&AuthError::invalid_request("missing parameter: token"));
    }

    let mut response = services.authority.introspect_token(&form.token);
    if response.active
        && let Some(jti) = response.jti.as_deref()
    {
        match services.revocations.is_revoked(jti).await {
            Ok(false) => {}
            Ok(true) => response = IntrospectionResponse::inactive(),
            Err(e) => {
                tracing::warn!(error = %e, "Revocation lookup failed during introspection");
                response = IntrospectionResponse::inactive();
            }
        }
    }
    tracing::debug!(active = response.active, "Token introspection completed");

    (StatusCode::OK, Json(response)).into_response()
}

/// `POST /auth/revoke`.
///
/// Access tokens go to the denylist until they expire; anything else is
/// treated as a refresh token and deleted. Unknown tokens are not an error.
pub async fn revoke_handler(
    State(services): State<AuthServices>,
    Form(form): Form<TokenForm>,
) -> Response {
    if form.token.is_empty() {
        return oauth_error_response(&AuthError::invalid_request("missing parameter: token"));
    }

    let hinted_refresh = form.token_type_hint.as_deref() == Some("refresh_token");
    if !hinted_refresh && let Ok(claims) = services.authority.jwt().decode(&form.token) {
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        if let Err(e) = services
            .revocations
            .revoke_for_user(&claims.jti, &claims.sub, expires_at)
            .await
        {
            tracing::warn!(error = %e, "Access token revocation failed");
            return oauth_error_response(&e);
        }
        return StatusCode::OK.into_response();
    }

    if let Err(e) = services.authority.revoke_refresh_token(&form.token).await {
        tracing::warn!(error = %e, "Refresh token revocation failed");
    }
    StatusCode::OK.into_response()
}
