//! OAuth 2.0 authorization server: authorization code flow with PKCE,
//! refresh tokens and dynamic client registration.

pub mod authority;
pub mod authorize;
pub mod pkce;
pub mod registration;
pub mod session;
pub mod token;

pub use authority::{AuthorityLifetimes, AuthorityStorage, SweepCounts, TokenAuthority};
pub use authorize::{AuthorizationRequest, AuthorizationResponse, AuthorizeError};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use registration::{ClientRegistrationRequest, ClientRegistrationResponse};
pub use session::AuthorizationCode;
pub use token::{
    CLIENT_ASSERTION_TYPE_JWT_BEARER, ClientCredentials, TokenErrorResponse, TokenRequest,
    TokenResponse,
};
