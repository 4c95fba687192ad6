//! Axum integration: authentication extractors, the enforcement middleware
//! and error rendering.

pub mod authenticate;
pub mod enforce;
pub mod error;

pub use authenticate::{API_KEY_HEADER, AdminAuth, Identity, authenticate, bearer_token};
pub use enforce::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_REPLAYED_HEADER, enforce};
pub use error::{no_store, oauth_error_response, operation_outcome_json, status_for};
