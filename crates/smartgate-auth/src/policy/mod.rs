//! Access control: RBAC, ABAC and patient consent.

pub mod abac;
pub mod consent;
pub mod engine;
pub mod rbac;
pub mod target;

pub use abac::{AbacDecision, AbacEvaluator, AbacPolicy};
pub use consent::{
    ConsentAction, ConsentDirective, ConsentEnforcer, ConsentError, ConsentKind, ConsentStatus,
};
pub use engine::{AccessDecision, DenyReason, PolicyEngine, operation_for_method};
pub use rbac::{ADMIN_ROLE, RbacRule, RoleRequirements, roles_satisfy};
pub use target::{PatientTarget, resolve_patient_target};
