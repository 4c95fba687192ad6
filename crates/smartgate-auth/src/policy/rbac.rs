//! Role-based endpoint access.

use serde::{Deserialize, Serialize};

/// Role that bypasses every RBAC, ABAC and consent check.
pub const ADMIN_ROLE: &str = "admin";

/// Roles required for requests matching a method and path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacRule {
    /// HTTP methods this rule applies to; empty matches any method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Path prefix, matched on segment boundaries.
    pub path_prefix: String,

    /// At least one of these roles is required.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RbacRule {
    #[must_use]
    pub fn new(path_prefix: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            methods: Vec::new(),
            path_prefix: path_prefix.into(),
            roles: roles.iter().map(ToString::to_string).collect(),
        }
    }

    /// Restricts the rule to the given methods.
    #[must_use]
    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    /// Returns `true` if the rule applies to the request.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok =
            self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
        method_ok && prefix_matches(&self.path_prefix, path)
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Ordered rule list. The most specific (longest prefix) matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RoleRequirements {
    rules: Vec<RbacRule>,
}

impl RoleRequirements {
    #[must_use]
    pub fn new(rules: Vec<RbacRule>) -> Self {
        Self { rules }
    }

    /// The rule governing a request, if any.
    #[must_use]
    pub fn rule_for(&self, method: &str, path: &str) -> Option<&RbacRule> {
        self.rules
            .iter()
            .filter(|r| r.matches(method, path))
            .max_by_key(|r| r.path_prefix.trim_end_matches('/').len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Returns `true` if `roles` holds admin or intersects `required`.
#[must_use]
pub fn roles_satisfy(roles: &[String], required: &[String]) -> bool {
    roles
        .iter()
        .any(|r| r == ADMIN_ROLE || required.iter().any(|req| req == r))
}
