//! Domain types shared across the crate.

pub mod client;
pub mod refresh_token;

pub use client::{Client, ClientDefinition, ClientKind, ClientValidationError, hash_secret};
pub use refresh_token::{RefreshToken, generate_refresh_token, hash_refresh_token};
