//! SMART discovery documents.

use axum::{Json, extract::State, response::IntoResponse};

use crate::services::AuthServices;

/// `GET /.well-known/smart-configuration`, also served as
/// `/.well-known/openid-configuration`.
pub async fn smart_configuration_handler(State(services): State<AuthServices>) -> impl IntoResponse {
    Json(services.discovery.as_ref().clone())
}
