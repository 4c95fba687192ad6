//! `GET /auth/authorize` and `POST /auth/launch`.
//!
//! # Flow
//!
//! 1. EHR calls `POST /auth/launch` with patient/encounter context
//! 2. Server returns a launch id and the FHIR base URL as `iss`
//! 3. EHR opens the app with `launch` and `iss`
//! 4. App passes `launch` to `/auth/authorize`
//! 5. The context lands in the code, then in the token response

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use crate::error::AuthError;
use crate::middleware::{AdminAuth, oauth_error_response};
use crate::oauth::{AuthorizationRequest, AuthorizeError};
use crate::services::AuthServices;
use crate::smart::LaunchContext;

/// Authorization endpoint.
///
/// Answers with a 303 redirect to the client carrying either `code` and
/// `state` or `error`. Problems with the client or redirect URI are
/// rendered directly and never redirected.
pub async fn authorize_handler(
    State(services): State<AuthServices>,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    match services.authority.authorize(&request).await {
        Ok(response) => match response.to_redirect_url() {
            Ok(url) => {
                tracing::info!(client_id = %request.client_id, "Authorization code issued");
                Redirect::to(&url).into_response()
            }
            Err(e) => oauth_error_response(&AuthError::invalid_request(format!(
                "invalid redirect_uri: {e}"
            ))),
        },
        Err(err) => {
            tracing::debug!(client_id = %request.client_id, error = %err.error(), "Authorization denied");
            match err.to_redirect_url() {
                Some(url) => Redirect::to(&url).into_response(),
                None => oauth_error_response(&err.into_error()),
            }
        }
    }
}

// =============================================================================
// Launch
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CreateLaunchResponse {
    /// Value for the app's `launch` parameter.
    pub launch: String,
    /// FHIR base URL the app should use.
    pub iss: String,
    /// Seconds until the launch id expires.
    pub expires_in: i64,
}

/// Creates a one-time EHR launch context. Admin only.
pub async fn launch_handler(
    State(services): State<AuthServices>,
    AdminAuth(identity): AdminAuth,
    Json(context): Json<LaunchContext>,
) -> Result<(StatusCode, Json<CreateLaunchResponse>), AuthError> {
    let stored = services.authority.create_launch_context(context).await?;
    tracing::info!(
        launch_id = %stored.launch_id,
        created_by = %identity.subject,
        "Launch context created"
    );
    Ok((
        StatusCode::CREATED,
        Json(CreateLaunchResponse {
            launch: stored.launch_id,
            iss: services.config.fhir_base_url.clone(),
            expires_in: (stored.expires_at - stored.created_at).whole_seconds(),
        }),
    ))
}
