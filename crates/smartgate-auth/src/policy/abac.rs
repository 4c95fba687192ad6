//! Attribute-based access per resource type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::RequestIdentity;

/// Access policy for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbacPolicy {
    pub resource_type: String,

    #[serde(default)]
    pub allowed_roles: Vec<String>,

    /// Access additionally requires an active patient consent.
    #[serde(default)]
    pub consent_required: bool,

    /// Access additionally requires care team membership.
    #[serde(default)]
    pub care_team_required: bool,
}

/// Outcome of an ABAC evaluation.
///
/// The two flags are obligations the caller must discharge before
/// allowing the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbacDecision {
    pub allowed: bool,
    pub reason: String,
    pub consent_required: bool,
    pub care_team_required: bool,
}

impl AbacDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            consent_required: false,
            care_team_required: false,
        }
    }
}

/// Evaluates identities against per-resource-type policies.
#[derive(Debug, Clone, Default)]
pub struct AbacEvaluator {
    policies: HashMap<String, AbacPolicy>,
}

impl AbacEvaluator {
    /// Later policies for the same resource type replace earlier ones.
    #[must_use]
    pub fn new(policies: impl IntoIterator<Item = AbacPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.resource_type.clone(), p))
                .collect(),
        }
    }

    #[must_use]
    pub fn policy(&self, resource_type: &str) -> Option<&AbacPolicy> {
        self.policies.get(resource_type)
    }

    #[must_use]
    pub fn evaluate(&self, identity: &RequestIdentity, resource_type: &str) -> AbacDecision {
        if identity.is_admin() {
            return AbacDecision {
                allowed: true,
                reason: "admin".to_string(),
                consent_required: false,
                care_team_required: false,
            };
        }

        let Some(policy) = self.policies.get(resource_type) else {
            return AbacDecision::deny(format!("no access policy for {resource_type}"));
        };

        let matched = identity
            .roles
            .iter()
            .find(|r| policy.allowed_roles.contains(r));
        match matched {
            Some(role) => AbacDecision {
                allowed: true,
                reason: format!("role '{role}' allowed for {resource_type}"),
                consent_required: policy.consent_required,
                care_team_required: policy.care_team_required,
            },
            None => AbacDecision::deny(format!(
                "none of the caller's roles may access {resource_type}"
            )),
        }
    }
}
