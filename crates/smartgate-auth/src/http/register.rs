//! `POST /auth/register`: dynamic client registration.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::AuthError;
use crate::middleware::{no_store, oauth_error_response};
use crate::oauth::ClientRegistrationRequest;
use crate::services::AuthServices;

/// Registers a client from RFC 7591 metadata. 201 with the client id and,
/// for confidential clients, the secret.
pub async fn register_handler(
    State(services): State<AuthServices>,
    Json(request): Json<ClientRegistrationRequest>,
) -> Response {
    if !services.config.oauth.dynamic_registration {
        return AuthError::not_found("dynamic client registration is disabled").into_response();
    }

    match services.authority.register(request).await {
        Ok(registered) => {
            tracing::info!(client_id = %registered.client_id, "Client registered dynamically");
            let mut response = (StatusCode::CREATED, Json(registered)).into_response();
            no_store(response.headers_mut());
            response
        }
        Err(e) => {
            tracing::debug!(error = %e, "Client registration rejected");
            oauth_error_response(&e)
        }
    }
}
