//! # smartgate-auth
//!
//! Authorization and credential subsystem for a FHIR API.
//!
//! This crate provides:
//! - A SMART on FHIR OAuth 2.0 authorization server (authorization code with
//!   PKCE, refresh tokens, EHR launch contexts)
//! - RFC 7523 backend-service client authentication with replay protection
//! - Validation of externally issued tokens against a cached key set
//! - RBAC, ABAC, SMART scope and consent decisions
//! - API keys, token revocation and idempotent write replay
//!
//! ## Modules
//!
//! - [`config`] - Configuration of every component
//! - [`oauth`] - Authorization server ([`TokenAuthority`])
//! - [`backend`] - Backend-service client assertions
//! - [`federation`] - Key cache and external token validation
//! - [`smart`] - SMART scopes, launch contexts and discovery
//! - [`policy`] - RBAC, ABAC and consent
//! - [`credentials`] - API keys, revocation and idempotency stores
//! - [`storage`] - Storage traits with in-memory backends
//! - [`middleware`] - Axum extractors and the enforcement middleware
//! - [`http`] - Axum handlers for the auth endpoints
//! - [`services`] - The assembled subsystem shared as router state
//! - [`tasks`] - Periodic maintenance with cancellation

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod federation;
pub mod http;
pub mod identity;
pub mod middleware;
pub mod oauth;
pub mod policy;
pub mod services;
pub mod smart;
pub mod storage;
pub mod tasks;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

pub use backend::BackendServiceAuthenticator;
pub use config::{AuthConfig, ConfigError};
pub use credentials::{ApiKeyManager, IdempotencyStore, RevocationStore};
pub use error::{AuthError, ErrorCategory};
pub use federation::{ExternalTokenValidator, KeyCache};
pub use http::auth_routes;
pub use identity::{IdentitySource, RequestIdentity};
pub use middleware::{AdminAuth, Identity, enforce};
pub use oauth::TokenAuthority;
pub use policy::{AccessDecision, ConsentEnforcer, PolicyEngine};
pub use services::{AuthServices, AuthStores};
pub use smart::{SmartConfiguration, SmartScopes};
pub use tasks::{MaintenanceTasks, Sweep};
pub use types::Client;

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;
