//! SMART backend services (`client_credentials` with `private_key_jwt`).

pub mod assertion;
pub mod authenticator;

pub use assertion::{Audience, ClientAssertionClaims, parse_unverified};
pub use authenticator::{BackendAuthConfig, BackendServiceAuthenticator};
