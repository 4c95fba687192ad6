//! Access token signing, verification and introspection.

pub mod introspection;
pub mod jwt;

pub use introspection::IntrospectionResponse;
pub use jwt::{AccessTokenClaims, JwtError, JwtService, new_jti};
