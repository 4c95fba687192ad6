//! Storage traits for authorization state.
//!
//! Every persistent concern has its own trait so backends can be swapped
//! independently. The [`memory`] module provides the in-memory backends the
//! server runs with out of the box.

pub mod api_key;
pub mod client;
pub mod code;
pub mod consent;
pub mod idempotency;
pub mod jti;
pub mod launch_context;
pub mod memory;
pub mod refresh_token;
pub mod revocation;

pub use api_key::ApiKeyStorage;
pub use client::ClientStorage;
pub use code::AuthorizationCodeStorage;
pub use consent::ConsentStorage;
pub use idempotency::IdempotencyStorage;
pub use jti::JtiStorage;
pub use launch_context::LaunchContextStorage;
pub use memory::{
    InMemoryApiKeyStorage, InMemoryAuthorizationCodeStorage, InMemoryClientStorage,
    InMemoryConsentStorage, InMemoryJtiStorage, InMemoryLaunchContextStorage,
    InMemoryRefreshTokenStorage,
};
pub use refresh_token::RefreshTokenStorage;
pub use revocation::RevocationStorage;
