//! HTTP handlers for the OAuth, SMART and administrative endpoints.
//!
//! # Available Handlers
//!
//! - [`authorize`] - authorization code flow and EHR launch contexts
//! - [`token`] - token endpoint for every supported grant
//! - [`introspect`] - RFC 7662 introspection and RFC 7009 revocation
//! - [`register`] - dynamic client registration
//! - [`discovery`] - SMART configuration
//! - [`admin`] - API key and revocation management

pub mod admin;
pub mod authorize;
pub mod discovery;
pub mod introspect;
pub mod register;
pub mod token;

use axum::{
    Router,
    routing::{get, post},
};

use crate::services::AuthServices;

pub use authorize::{authorize_handler, launch_handler};
pub use discovery::smart_configuration_handler;
pub use introspect::{introspect_handler, revoke_handler};
pub use register::register_handler;
pub use token::token_handler;

/// Routes of the authorization server. The caller supplies the state.
pub fn auth_routes() -> Router<AuthServices> {
    Router::new()
        .route("/auth/authorize", get(authorize_handler))
        .route("/auth/token", post(token_handler))
        .route("/auth/introspect", post(introspect_handler))
        .route("/auth/revoke", post(revoke_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/launch", post(launch_handler))
        .route(
            "/.well-known/smart-configuration",
            get(smart_configuration_handler),
        )
        .route(
            "/.well-known/openid-configuration",
            get(smart_configuration_handler),
        )
        .route(
            "/auth/api-keys",
            post(admin::create_api_key).get(admin::list_api_keys),
        )
        .route("/auth/api-keys/{id}", get(admin::get_api_key))
        .route("/auth/api-keys/{id}/revoke", post(admin::revoke_api_key))
        .route("/auth/api-keys/{id}/rotate", post(admin::rotate_api_key))
        .route(
            "/auth/revocations",
            post(admin::revoke_token).get(admin::list_revocations),
        )
        .route(
            "/auth/revocations/users/{user_id}",
            post(admin::revoke_user_tokens),
        )
}
