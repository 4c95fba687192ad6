//! Tokens issued by an external identity provider.

pub mod jwks;
pub mod validator;

pub use jwks::{KeyCache, KeyCacheError};
pub use validator::{EXTERNAL_ALGORITHMS, ExternalTokenValidator};
