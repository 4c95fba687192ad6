//! SMART on FHIR scope parsing and matching.
//!
//! Resource scopes follow `<context>/<resourceType>.<operation>`:
//!
//! - context: `patient`, `user` or `system`
//! - resource type: a FHIR type name or `*`
//! - operation: `read`, `write` or `*` (SMART v1), or SMART v2 permission
//!   letters drawn from `cruds` in that order
//!
//! Non-resource scopes (`openid`, `launch`, `offline_access`, ...) are
//! recognized by name and never grant resource access.
//!
//! Matching deliberately ignores the context: a granted scope covers a
//! request when its resource type and operation cover it. Correlating a
//! `patient/` scope with the token's patient happens in the enforcement
//! layer.

use std::fmt;

/// Scopes recognized by name.
pub const NAMED_SCOPES: &[&str] = &[
    "openid",
    "fhirUser",
    "profile",
    "launch",
    "launch/patient",
    "launch/encounter",
    "offline_access",
    "online_access",
];

/// Scope parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("empty scope")]
    Empty,

    #[error("unknown scope: {0}")]
    Unknown(String),

    #[error("invalid scope context '{0}': must be patient, user or system")]
    InvalidContext(String),

    #[error("invalid resource type '{0}'")]
    InvalidResourceType(String),

    #[error("invalid scope operation '{0}'")]
    InvalidOperation(String),

    #[error("malformed scope: {0}")]
    Malformed(String),
}

// =============================================================================
// Scope components
// =============================================================================

/// Whose data a resource scope refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeContext {
    Patient,
    User,
    System,
}

impl ScopeContext {
    fn parse(s: &str) -> Result<Self, ScopeError> {
        match s {
            "patient" => Ok(Self::Patient),
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(ScopeError::InvalidContext(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::System => "system",
        }
    }
}

/// Operation granted by a scope, or requested by an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeOperation {
    Read,
    Write,
    /// `*`: both read and write.
    All,
}

impl ScopeOperation {
    fn parse(s: &str) -> Result<Self, ScopeError> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "*" => Ok(Self::All),
            other => Self::parse_v2(other),
        }
    }

    /// Parses SMART v2 permission letters (`cruds` subset, in order).
    fn parse_v2(s: &str) -> Result<Self, ScopeError> {
        const ORDER: &str = "cruds";
        let mut last = None;
        let (mut reads, mut writes) = (false, false);

        for c in s.chars() {
            let pos = ORDER
                .find(c)
                .ok_or_else(|| ScopeError::InvalidOperation(s.to_string()))?;
            if last.is_some_and(|prev| pos <= prev) {
                return Err(ScopeError::InvalidOperation(s.to_string()));
            }
            last = Some(pos);
            match c {
                'r' | 's' => reads = true,
                _ => writes = true,
            }
        }

        match (reads, writes) {
            (true, true) => Ok(Self::All),
            (true, false) => Ok(Self::Read),
            (false, true) => Ok(Self::Write),
            (false, false) => Err(ScopeError::InvalidOperation(s.to_string())),
        }
    }

    /// Returns `true` if a scope granting `self` permits `requested`.
    #[must_use]
    pub fn covers(&self, requested: ScopeOperation) -> bool {
        *self == Self::All || *self == requested
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::All => "*",
        }
    }
}

/// Resource type of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeResource {
    Any,
    Type(String),
}

impl ScopeResource {
    fn parse(s: &str) -> Result<Self, ScopeError> {
        if s == "*" {
            return Ok(Self::Any);
        }
        let mut chars = s.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_alphanumeric());
        if valid {
            Ok(Self::Type(s.to_string()))
        } else {
            Err(ScopeError::InvalidResourceType(s.to_string()))
        }
    }

    #[must_use]
    pub fn covers(&self, resource_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Type(t) => t == resource_type,
        }
    }

    fn includes(&self, other: &ScopeResource) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Type(_), Self::Any) => false,
        }
    }
}

// =============================================================================
// Resource scope
// =============================================================================

/// A parsed resource scope such as `patient/Observation.read`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmartScope {
    pub context: ScopeContext,
    pub resource: ScopeResource,
    pub operation: ScopeOperation,
}

impl SmartScope {
    /// Parses a resource scope.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError` if any component is invalid.
    pub fn parse(scope: &str) -> Result<Self, ScopeError> {
        if scope.is_empty() {
            return Err(ScopeError::Empty);
        }
        let (context, rest) = scope
            .split_once('/')
            .ok_or_else(|| ScopeError::Malformed(scope.to_string()))?;
        let (resource, operation) = rest
            .split_once('.')
            .ok_or_else(|| ScopeError::Malformed(scope.to_string()))?;

        Ok(Self {
            context: ScopeContext::parse(context)?,
            resource: ScopeResource::parse(resource)?,
            operation: ScopeOperation::parse(operation)?,
        })
    }

    /// Returns `true` if this scope permits `operation` on `resource_type`.
    #[must_use]
    pub fn covers(&self, resource_type: &str, operation: ScopeOperation) -> bool {
        self.resource.covers(resource_type) && self.operation.covers(operation)
    }

    /// Returns `true` if every access `other` grants is also granted by
    /// `self` within the same context.
    #[must_use]
    pub fn includes(&self, other: &SmartScope) -> bool {
        self.context == other.context
            && self.resource.includes(&other.resource)
            && self.operation.covers(other.operation)
    }
}

impl fmt::Display for SmartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resource = match &self.resource {
            ScopeResource::Any => "*",
            ScopeResource::Type(t) => t.as_str(),
        };
        write!(
            f,
            "{}/{}.{}",
            self.context.as_str(),
            resource,
            self.operation.as_str()
        )
    }
}

// =============================================================================
// Scope and scope sets
// =============================================================================

/// Any scope string the server understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Resource(SmartScope),
    Named(String),
}

impl Scope {
    /// Parses a single scope token.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError` for unknown names or malformed resource scopes.
    pub fn parse(scope: &str) -> Result<Self, ScopeError> {
        if scope.is_empty() {
            return Err(ScopeError::Empty);
        }
        if NAMED_SCOPES.contains(&scope) {
            return Ok(Self::Named(scope.to_string()));
        }
        if scope.contains('/') {
            return SmartScope::parse(scope).map(Self::Resource);
        }
        Err(ScopeError::Unknown(scope.to_string()))
    }
}

/// A parsed, space separated scope string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmartScopes {
    scopes: Vec<Scope>,
}

impl SmartScopes {
    /// Parses a space separated scope string, failing on the first invalid
    /// token.
    ///
    /// # Errors
    ///
    /// Returns the error of the first invalid scope.
    pub fn parse(scope: &str) -> Result<Self, ScopeError> {
        let scopes = scope
            .split_whitespace()
            .map(Scope::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scopes })
    }

    /// Parses a list of scope strings, silently skipping unrecognized ones.
    ///
    /// Used for claims carried by already-issued credentials.
    #[must_use]
    pub fn from_granted<S: AsRef<str>>(scopes: &[S]) -> Self {
        let scopes = scopes
            .iter()
            .filter_map(|s| Scope::parse(s.as_ref()).ok())
            .collect();
        Self { scopes }
    }

    /// Resource scopes in this set.
    pub fn resource_scopes(&self) -> impl Iterator<Item = &SmartScope> {
        self.scopes.iter().filter_map(|s| match s {
            Scope::Resource(r) => Some(r),
            Scope::Named(_) => None,
        })
    }

    /// Returns `true` if the named scope is present.
    #[must_use]
    pub fn has_named(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|s| matches!(s, Scope::Named(n) if n == name))
    }

    /// Returns `true` if any resource scope covers the request.
    #[must_use]
    pub fn permits(&self, resource_type: &str, operation: ScopeOperation) -> bool {
        self.resource_scopes()
            .any(|s| s.covers(resource_type, operation))
    }

    /// Resource scopes covering the request.
    pub fn granting<'a>(
        &'a self,
        resource_type: &'a str,
        operation: ScopeOperation,
    ) -> impl Iterator<Item = &'a SmartScope> + 'a {
        self.resource_scopes()
            .filter(move |s| s.covers(resource_type, operation))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Splits a space separated scope string.
#[must_use]
pub fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(s: &str) -> SmartScope {
        SmartScope::parse(s).unwrap()
    }

    // -------------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_v1_scope() {
        let s = scope("patient/Observation.read");
        assert_eq!(s.context, ScopeContext::Patient);
        assert_eq!(s.resource, ScopeResource::Type("Observation".to_string()));
        assert_eq!(s.operation, ScopeOperation::Read);
        assert_eq!(s.to_string(), "patient/Observation.read");
    }

    #[test]
    fn test_parse_wildcards() {
        let s = scope("user/*.*");
        assert_eq!(s.resource, ScopeResource::Any);
        assert_eq!(s.operation, ScopeOperation::All);
    }

    #[test]
    fn test_parse_v2_permissions() {
        assert_eq!(scope("patient/Observation.rs").operation, ScopeOperation::Read);
        assert_eq!(scope("patient/Observation.cud").operation, ScopeOperation::Write);
        assert_eq!(scope("system/*.cruds").operation, ScopeOperation::All);
        assert_eq!(scope("user/Patient.r").operation, ScopeOperation::Read);
    }

    #[test]
    fn test_parse_v2_rejects_bad_order() {
        assert!(matches!(
            SmartScope::parse("patient/Observation.sr"),
            Err(ScopeError::InvalidOperation(_))
        ));
        assert!(matches!(
            SmartScope::parse("patient/Observation.rr"),
            Err(ScopeError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SmartScope::parse(""), Err(ScopeError::Empty));
        assert!(matches!(
            SmartScope::parse("admin/Patient.read"),
            Err(ScopeError::InvalidContext(_))
        ));
        assert!(matches!(
            SmartScope::parse("patient/observation.read"),
            Err(ScopeError::InvalidResourceType(_))
        ));
        assert!(matches!(
            SmartScope::parse("patient/Patient.delete"),
            Err(ScopeError::InvalidOperation(_))
        ));
        assert!(matches!(
            SmartScope::parse("patient/Patient"),
            Err(ScopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_named_scopes() {
        assert_eq!(
            Scope::parse("launch/patient").unwrap(),
            Scope::Named("launch/patient".to_string())
        );
        assert_eq!(
            Scope::parse("offline_access").unwrap(),
            Scope::Named("offline_access".to_string())
        );
        assert!(matches!(Scope::parse("superuser"), Err(ScopeError::Unknown(_))));
    }

    #[test]
    fn test_scope_set_parse_fails_on_any_invalid() {
        assert!(SmartScopes::parse("openid patient/*.read").is_ok());
        assert!(SmartScopes::parse("openid patient/*.bogus").is_err());
    }

    #[test]
    fn test_from_granted_skips_unknown() {
        let scopes = SmartScopes::from_granted(&["weird", "patient/*.read"]);
        assert_eq!(scopes.resource_scopes().count(), 1);
    }

    // -------------------------------------------------------------------------
    // Matching
    // -------------------------------------------------------------------------

    #[test]
    fn test_user_wildcard_matches_everything() {
        let s = scope("user/*.*");
        for resource in ["Patient", "Observation", "Encounter"] {
            assert!(s.covers(resource, ScopeOperation::Read));
            assert!(s.covers(resource, ScopeOperation::Write));
        }
    }

    #[test]
    fn test_patient_read_wildcard() {
        let s = scope("patient/*.read");
        assert!(s.covers("Observation", ScopeOperation::Read));
        assert!(s.covers("Patient", ScopeOperation::Read));
        assert!(!s.covers("Observation", ScopeOperation::Write));
    }

    #[test]
    fn test_exact_scope_matches_only_its_resource() {
        let s = scope("patient/Patient.read");
        assert!(s.covers("Patient", ScopeOperation::Read));
        assert!(!s.covers("Observation", ScopeOperation::Read));
        assert!(!s.covers("Patient", ScopeOperation::Write));
    }

    #[test]
    fn test_named_scopes_grant_nothing() {
        let scopes = SmartScopes::parse("openid fhirUser launch offline_access").unwrap();
        assert!(!scopes.permits("Patient", ScopeOperation::Read));
        assert!(scopes.has_named("offline_access"));
        assert!(!scopes.has_named("online_access"));
    }

    #[test]
    fn test_includes_respects_context() {
        assert!(scope("patient/*.read").includes(&scope("patient/Observation.read")));
        assert!(scope("patient/*.*").includes(&scope("patient/Observation.write")));
        assert!(!scope("patient/*.read").includes(&scope("user/Observation.read")));
        assert!(!scope("patient/Observation.read").includes(&scope("patient/*.read")));
        assert!(!scope("patient/*.read").includes(&scope("patient/*.*")));
    }

    #[test]
    fn test_granting_lists_covering_scopes() {
        let scopes = SmartScopes::parse("patient/Observation.read user/*.read").unwrap();
        let granting: Vec<_> = scopes.granting("Observation", ScopeOperation::Read).collect();
        assert_eq!(granting.len(), 2);
        let granting: Vec<_> = scopes.granting("Patient", ScopeOperation::Read).collect();
        assert_eq!(granting.len(), 1);
        assert_eq!(granting[0].context, ScopeContext::User);
    }
}
