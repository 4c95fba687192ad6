//! `POST /auth/token`.

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, info, warn};

use crate::AuthResult;
use crate::error::AuthError;
use crate::middleware::{no_store, oauth_error_response};
use crate::oauth::token::{
    GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_REFRESH_TOKEN,
};
use crate::oauth::{CLIENT_ASSERTION_TYPE_JWT_BEARER, ClientCredentials, TokenRequest, TokenResponse};
use crate::services::AuthServices;

/// OAuth 2.0 token endpoint.
///
/// Interactive clients authenticate with HTTP Basic, `client_secret_post`,
/// or, when public, with `client_id` alone. Backend services authenticate
/// with a JWT client assertion on the `client_credentials` grant.
pub async fn token_handler(
    State(services): State<AuthServices>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    debug!(
        grant_type = %request.grant_type,
        client_id = ?request.client_id,
        "Processing token request"
    );

    match issue(&services, &headers, &request).await {
        Ok(response) => {
            info!(grant_type = %request.grant_type, scope = %response.scope, "Token issued");
            let mut response = (StatusCode::OK, Json(response)).into_response();
            no_store(response.headers_mut());
            response
        }
        Err(e) => {
            warn!(grant_type = %request.grant_type, error = %e, "Token request failed");
            oauth_error_response(&e)
        }
    }
}

async fn issue(
    services: &AuthServices,
    headers: &HeaderMap,
    request: &TokenRequest,
) -> AuthResult<TokenResponse> {
    let grant_type = request.grant_type.as_str();
    if grant_type.is_empty() {
        return Err(AuthError::invalid_request("missing parameter: grant_type"));
    }
    if !services.config.oauth.grant_types.iter().any(|g| g == grant_type) {
        return Err(AuthError::unsupported_grant_type(grant_type));
    }

    match grant_type {
        GRANT_AUTHORIZATION_CODE => {
            let credentials = client_credentials(headers, request)?;
            services.authority.exchange_code(request, &credentials).await
        }
        GRANT_REFRESH_TOKEN => {
            let credentials = client_credentials(headers, request)?;
            let refresh_token = TokenRequest::require(&request.refresh_token, "refresh_token")?;
            services
                .authority
                .refresh_access_token(refresh_token, &credentials, request.scope.as_deref())
                .await
        }
        GRANT_CLIENT_CREDENTIALS => {
            let assertion_type =
                TokenRequest::require(&request.client_assertion_type, "client_assertion_type")?;
            if assertion_type != CLIENT_ASSERTION_TYPE_JWT_BEARER {
                return Err(AuthError::invalid_client(
                    "unsupported client_assertion_type",
                ));
            }
            let assertion = TokenRequest::require(&request.client_assertion, "client_assertion")?;
            let client = services.backend.authenticate_client(assertion).await?;
            if let Some(client_id) = request.client_id.as_deref()
                && client_id != client.client_id
            {
                return Err(AuthError::invalid_client("client authentication failed"));
            }
            services
                .backend
                .issue_access_token(&client, request.scope.as_deref())
        }
        other => Err(AuthError::unsupported_grant_type(other)),
    }
}

/// Client id and secret from HTTP Basic auth, else from the form.
fn client_credentials(headers: &HeaderMap, request: &TokenRequest) -> AuthResult<ClientCredentials> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(encoded) = value.strip_prefix("Basic ")
    {
        let (client_id, secret) = parse_basic(encoded)
            .ok_or_else(|| AuthError::invalid_client("malformed Basic credentials"))?;
        if let Some(form_id) = request.client_id.as_deref()
            && form_id != client_id
        {
            return Err(AuthError::invalid_request("client_id does not match Basic credentials"));
        }
        return Ok(ClientCredentials::confidential(client_id, secret));
    }

    let client_id = TokenRequest::require(&request.client_id, "client_id")?;
    Ok(match request.client_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => ClientCredentials::confidential(client_id, secret),
        None => ClientCredentials::public(client_id),
    })
}

/// Decodes `base64(client_id:client_secret)`.
fn parse_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    (!client_id.is_empty()).then(|| (client_id.to_string(), secret.to_string()))
}
