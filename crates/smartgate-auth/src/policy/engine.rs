//! Access decisions for authenticated requests.
//!
//! [`PolicyEngine`] combines endpoint RBAC, per-resource-type ABAC and SMART
//! scope checks. Consent obligations raised by ABAC are discharged by the
//! caller with a [`ConsentEnforcer`](super::ConsentEnforcer).

use serde::Serialize;

use crate::config::PolicyConfig;
use crate::error::AuthError;
use crate::identity::RequestIdentity;
use crate::policy::abac::{AbacDecision, AbacEvaluator};
use crate::policy::rbac::{RoleRequirements, roles_satisfy};
use crate::policy::target::PatientTarget;
use crate::smart::{ScopeContext, ScopeOperation};

// =============================================================================
// Access Decision
// =============================================================================

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }

    /// Converts a denial into a `Forbidden` error.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Forbidden` carrying the denial message.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason.into()),
        }
    }
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Why access was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyReason {
    /// Stable machine-readable code.
    pub code: &'static str,
    pub message: String,
}

impl DenyReason {
    #[must_use]
    pub fn insufficient_role(path: &str) -> Self {
        Self {
            code: "insufficient-role",
            message: format!("caller lacks a role required for {path}"),
        }
    }

    #[must_use]
    pub fn insufficient_scope(resource_type: &str, operation: ScopeOperation) -> Self {
        Self {
            code: "insufficient-scope",
            message: format!(
                "no granted scope permits {} on {resource_type}",
                operation.as_str()
            ),
        }
    }

    #[must_use]
    pub fn patient_mismatch() -> Self {
        Self {
            code: "patient-context-mismatch",
            message: "patient-scoped access is limited to the patient in context".to_string(),
        }
    }

    #[must_use]
    pub fn patient_unresolved() -> Self {
        Self {
            code: "patient-target-unresolved",
            message: "patient-scoped access must name the patient in context".to_string(),
        }
    }

    #[must_use]
    pub fn patient_ambiguous() -> Self {
        Self {
            code: "patient-target-ambiguous",
            message: "patient-scoped access must address a single patient".to_string(),
        }
    }

    #[must_use]
    pub fn patient_context_missing() -> Self {
        Self {
            code: "patient-context-missing",
            message: "patient-scoped token carries no patient context".to_string(),
        }
    }

    #[must_use]
    pub fn abac(decision: &AbacDecision) -> Self {
        Self {
            code: "access-policy",
            message: decision.reason.clone(),
        }
    }

    #[must_use]
    pub fn consent(message: impl Into<String>) -> Self {
        Self {
            code: "consent",
            message: message.into(),
        }
    }
}

impl From<DenyReason> for AuthError {
    fn from(reason: DenyReason) -> Self {
        AuthError::forbidden(reason.message)
    }
}

// =============================================================================
// Policy Engine
// =============================================================================

/// RBAC, ABAC and scope checks over a [`RequestIdentity`].
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    rbac: RoleRequirements,
    abac: AbacEvaluator,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(rbac: RoleRequirements, abac: AbacEvaluator) -> Self {
        Self { rbac, abac }
    }

    #[must_use]
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            RoleRequirements::new(config.rbac.clone()),
            AbacEvaluator::new(config.abac.clone()),
        )
    }

    /// Endpoint-level RBAC.
    ///
    /// Endpoints without a rule impose no role requirement.
    #[must_use]
    pub fn authorize_endpoint(
        &self,
        identity: &RequestIdentity,
        method: &str,
        path: &str,
    ) -> AccessDecision {
        match self.rbac.rule_for(method, path) {
            None => AccessDecision::Allow,
            Some(rule) if roles_satisfy(&identity.roles, &rule.roles) => AccessDecision::Allow,
            Some(_) => {
                tracing::debug!(
                    subject = %identity.subject,
                    method,
                    path,
                    "RBAC denied request"
                );
                AccessDecision::Deny(DenyReason::insufficient_role(path))
            }
        }
    }

    /// Resource-type ABAC.
    #[must_use]
    pub fn evaluate_resource(&self, identity: &RequestIdentity, resource_type: &str) -> AbacDecision {
        let decision = self.abac.evaluate(identity, resource_type);
        if !decision.allowed {
            tracing::debug!(
                subject = %identity.subject,
                resource_type,
                reason = %decision.reason,
                "ABAC denied request"
            );
        }
        decision
    }

    /// SMART scope check with the patient-context cross-check.
    ///
    /// When every scope granting the request is a `patient/` scope, the
    /// request must address exactly the patient in context. Unresolved and
    /// ambiguous targets are denied.
    #[must_use]
    pub fn check_scopes(
        &self,
        identity: &RequestIdentity,
        resource_type: &str,
        operation: ScopeOperation,
        target: &PatientTarget,
    ) -> AccessDecision {
        let scopes = identity.smart_scopes();
        let granting: Vec<_> = scopes.granting(resource_type, operation).collect();
        if granting.is_empty() {
            tracing::debug!(
                subject = %identity.subject,
                resource_type,
                operation = operation.as_str(),
                "No scope grants request"
            );
            return AccessDecision::Deny(DenyReason::insufficient_scope(resource_type, operation));
        }

        let patient_only = granting
            .iter()
            .all(|s| s.context == ScopeContext::Patient);
        if !patient_only {
            return AccessDecision::Allow;
        }

        let Some(context_patient) = identity.patient.as_deref() else {
            tracing::debug!(subject = %identity.subject, "Patient scope without patient context");
            return AccessDecision::Deny(DenyReason::patient_context_missing());
        };
        match target {
            PatientTarget::Patient(id) if id == context_patient => AccessDecision::Allow,
            PatientTarget::Patient(id) => {
                tracing::warn!(
                    subject = %identity.subject,
                    context_patient,
                    target = %id,
                    "Patient-scoped token used for another patient"
                );
                AccessDecision::Deny(DenyReason::patient_mismatch())
            }
            PatientTarget::Unresolved => {
                tracing::debug!(
                    subject = %identity.subject,
                    resource_type,
                    "Patient-scoped request names no patient"
                );
                AccessDecision::Deny(DenyReason::patient_unresolved())
            }
            PatientTarget::Ambiguous => {
                tracing::warn!(
                    subject = %identity.subject,
                    resource_type,
                    "Patient-scoped request addresses several patients"
                );
                AccessDecision::Deny(DenyReason::patient_ambiguous())
            }
        }
    }
}

/// Scope operation implied by an HTTP method.
#[must_use]
pub fn operation_for_method(method: &str) -> ScopeOperation {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => ScopeOperation::Read,
        _ => ScopeOperation::Write,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySource;
    use crate::policy::{AbacPolicy, RbacRule};

    fn engine() -> PolicyEngine {
        PolicyEngine::from_config(&PolicyConfig {
            rbac: vec![RbacRule::new("/fhir/Patient", &["practitioner"])],
            abac: vec![AbacPolicy {
                resource_type: "Observation".to_string(),
                allowed_roles: vec!["practitioner".to_string()],
                consent_required: true,
                care_team_required: false,
            }],
        })
    }

    fn identity() -> RequestIdentity {
        RequestIdentity::anonymous("u1", IdentitySource::LocalToken)
    }

    // -------------------------------------------------------------------------
    // RBAC
    // -------------------------------------------------------------------------

    #[test]
    fn test_rbac_rule_enforced() {
        let engine = engine();
        let nurse = identity().with_roles(&["nurse"]);
        let decision = engine.authorize_endpoint(&nurse, "GET", "/fhir/Patient/1");
        assert_eq!(decision.deny_reason().unwrap().code, "insufficient-role");

        let doc = identity().with_roles(&["practitioner"]);
        assert!(engine.authorize_endpoint(&doc, "GET", "/fhir/Patient/1").is_allowed());

        let admin = identity().with_roles(&["admin"]);
        assert!(engine.authorize_endpoint(&admin, "GET", "/fhir/Patient/1").is_allowed());
    }

    #[test]
    fn test_unruled_endpoint_has_no_requirement() {
        assert!(engine()
            .authorize_endpoint(&identity(), "GET", "/fhir/Observation")
            .is_allowed());
    }

    #[test]
    fn test_abac_obligations_surface() {
        let doc = identity().with_roles(&["practitioner"]);
        let decision = engine().evaluate_resource(&doc, "Observation");
        assert!(decision.allowed);
        assert!(decision.consent_required);
        assert!(!engine().evaluate_resource(&doc, "Patient").allowed);
    }

    // -------------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------------

    #[test]
    fn test_scope_check() {
        let engine = engine();
        let reader = identity().with_scopes(&["user/Observation.read"]);
        assert!(engine
            .check_scopes(&reader, "Observation", ScopeOperation::Read, &PatientTarget::Unresolved)
            .is_allowed());

        let decision = engine.check_scopes(
            &reader,
            "Observation",
            ScopeOperation::Write,
            &PatientTarget::Unresolved,
        );
        assert_eq!(decision.deny_reason().unwrap().code, "insufficient-scope");
        assert!(decision.into_result().is_err());
    }

    #[test]
    fn test_patient_context_cross_check() {
        let engine = engine();
        let patient_app = identity()
            .with_scopes(&["patient/*.read"])
            .with_patient("123");
        let check = |target: PatientTarget| {
            engine.check_scopes(&patient_app, "Observation", ScopeOperation::Read, &target)
        };

        assert!(check(PatientTarget::Patient("123".to_string())).is_allowed());

        let decision = check(PatientTarget::Patient("999".to_string()));
        assert_eq!(decision.deny_reason().unwrap().code, "patient-context-mismatch");
    }

    #[test]
    fn test_patient_scope_denies_unpinned_targets() {
        let engine = engine();
        let patient_app = identity()
            .with_scopes(&["patient/Observation.read"])
            .with_patient("123");

        let decision = engine.check_scopes(
            &patient_app,
            "Observation",
            ScopeOperation::Read,
            &PatientTarget::Unresolved,
        );
        assert_eq!(decision.deny_reason().unwrap().code, "patient-target-unresolved");

        let decision = engine.check_scopes(
            &patient_app,
            "Observation",
            ScopeOperation::Read,
            &PatientTarget::Ambiguous,
        );
        assert_eq!(decision.deny_reason().unwrap().code, "patient-target-ambiguous");

        let no_context = identity().with_scopes(&["patient/Observation.read"]);
        let decision = engine.check_scopes(
            &no_context,
            "Observation",
            ScopeOperation::Read,
            &PatientTarget::Patient("123".to_string()),
        );
        assert_eq!(decision.deny_reason().unwrap().code, "patient-context-missing");
    }

    #[test]
    fn test_user_scope_lifts_patient_restriction() {
        let engine = engine();
        let mixed = identity()
            .with_scopes(&["patient/*.read", "user/Observation.read"])
            .with_patient("123");
        assert!(engine
            .check_scopes(
                &mixed,
                "Observation",
                ScopeOperation::Read,
                &PatientTarget::Patient("999".to_string())
            )
            .is_allowed());
    }

    #[test]
    fn test_operation_for_method() {
        assert_eq!(operation_for_method("GET"), ScopeOperation::Read);
        assert_eq!(operation_for_method("HEAD"), ScopeOperation::Read);
        assert_eq!(operation_for_method("POST"), ScopeOperation::Write);
        assert_eq!(operation_for_method("patch"), ScopeOperation::Write);
    }
}
