//! SMART on FHIR scopes, launch contexts and discovery.

pub mod discovery;
pub mod launch;
pub mod scopes;

pub use discovery::SmartConfiguration;
pub use launch::{
    DEFAULT_LAUNCH_CONTEXT_TTL, LaunchContext, StoredLaunchContext, generate_launch_id,
};
pub use scopes::{
    NAMED_SCOPES, Scope, ScopeContext, ScopeError, ScopeOperation, ScopeResource, SmartScope,
    SmartScopes, split_scopes,
};
