//! Administrative endpoints for API keys and token revocation.
//!
//! Every handler requires an identity holding the `admin` role.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::credentials::{ApiKey, GeneratedApiKey, NewApiKey, RevocationEntry};
use crate::error::AuthError;
use crate::middleware::AdminAuth;
use crate::services::AuthServices;

// =============================================================================
// API keys
// =============================================================================

/// `POST /auth/api-keys`. The raw key is in the response and nowhere else.
pub async fn create_api_key(
    State(services): State<AuthServices>,
    AdminAuth(admin): AdminAuth,
    Json(request): Json<NewApiKey>,
) -> AuthResult<(StatusCode, Json<GeneratedApiKey>)> {
    let generated = services.api_keys.generate_key(request).await?;
    tracing::info!(
        key_id = %generated.api_key.id,
        created_by = %admin.subject,
        "API key created"
    );
    Ok((StatusCode::CREATED, Json(generated)))
}

/// `GET /auth/api-keys`.
pub async fn list_api_keys(
    State(services): State<AuthServices>,
    _admin: AdminAuth,
) -> AuthResult<Json<Vec<ApiKey>>> {
    Ok(Json(services.api_keys.list_keys().await?))
}

/// `GET /auth/api-keys/{id}`.
pub async fn get_api_key(
    State(services): State<AuthServices>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AuthResult<Json<ApiKey>> {
    Ok(Json(services.api_keys.get_key(&id).await?))
}

/// `POST /auth/api-keys/{id}/revoke`. Revoking twice is not an error.
pub async fn revoke_api_key(
    State(services): State<AuthServices>,
    AdminAuth(admin): AdminAuth,
    Path(id): Path<String>,
) -> AuthResult<Json<ApiKey>> {
    let key = services.api_keys.revoke_key(&id).await?;
    tracing::info!(key_id = %id, revoked_by = %admin.subject, "API key revoked");
    Ok(Json(key))
}

/// `POST /auth/api-keys/{id}/rotate`. The old key stops working at once.
pub async fn rotate_api_key(
    State(services): State<AuthServices>,
    AdminAuth(admin): AdminAuth,
    Path(id): Path<String>,
) -> AuthResult<(StatusCode, Json<GeneratedApiKey>)> {
    let generated = services.api_keys.rotate_key(&id).await?;
    tracing::info!(
        old_key_id = %id,
        new_key_id = %generated.api_key.id,
        rotated_by = %admin.subject,
        "API key rotated"
    );
    Ok((StatusCode::CREATED, Json(generated)))
}

// =============================================================================
// Revocations
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeTokenRequest {
    pub token_id: String,

    #[serde(default)]
    pub user_id: Option<String>,

    /// When the token itself expires. Defaults to the longest interactive
    /// access token lifetime from now.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeUserResponse {
    pub user_id: String,
    pub revoked: usize,
}

/// `POST /auth/revocations`.
pub async fn revoke_token(
    State(services): State<AuthServices>,
    AdminAuth(admin): AdminAuth,
    Json(request): Json<RevokeTokenRequest>,
) -> AuthResult<(StatusCode, Json<RevocationEntry>)> {
    if request.token_id.is_empty() {
        return Err(AuthError::invalid_request("token_id is required"));
    }
    let expires_at = request
        .expires_at
        .unwrap_or_else(|| OffsetDateTime::now_utc() + services.config.oauth.access_token_lifetime);

    let entry = services
        .revocations
        .revoke(&request.token_id, request.user_id.as_deref(), expires_at)
        .await?;
    tracing::debug!(token_id = %entry.token_id, revoked_by = %admin.subject, "Revocation recorded");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /auth/revocations`.
pub async fn list_revocations(
    State(services): State<AuthServices>,
    _admin: AdminAuth,
) -> AuthResult<Json<Vec<RevocationEntry>>> {
    Ok(Json(services.revocations.list_active().await?))
}

/// `POST /auth/revocations/users/{user_id}`.
pub async fn revoke_user_tokens(
    State(services): State<AuthServices>,
    AdminAuth(admin): AdminAuth,
    Path(user_id): Path<String>,
) -> AuthResult<Json<RevokeUserResponse>> {
    let revoked = services.revocations.revoke_all_for_user(&user_id).await?;
    tracing::info!(user_id = %user_id, revoked, revoked_by = %admin.subject, "User tokens revoked");
    Ok(Json(RevokeUserResponse { user_id, revoked }))
}
