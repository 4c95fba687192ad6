//! Patient consent enforcement.
//!
//! Consent is only consulted when an ABAC policy flags the resource type.
//! Every failure mode (unknown patient, slow store, storage error) denies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::identity::RequestIdentity;
use crate::storage::ConsentStorage;

/// Whether a directive grants or refuses access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentKind {
    Permit,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    #[default]
    Active,
    Inactive,
}

/// Action a directive covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentAction {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "*")]
    All,
}

impl ConsentAction {
    /// Action implied by an HTTP method.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Self::Read,
            _ => Self::Write,
        }
    }
}

/// A patient's consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDirective {
    pub id: String,
    pub patient_id: String,
    pub kind: ConsentKind,

    /// Empty covers every action.
    #[serde(default)]
    pub actions: Vec<ConsentAction>,

    #[serde(default)]
    pub status: ConsentStatus,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl ConsentDirective {
    /// Returns `true` if the directive is in force for `action` at `now`.
    #[must_use]
    pub fn applies(&self, action: ConsentAction, now: OffsetDateTime) -> bool {
        self.status == ConsentStatus::Active
            && self.expires_at.is_none_or(|exp| exp > now)
            && (self.actions.is_empty()
                || self
                    .actions
                    .iter()
                    .any(|a| *a == ConsentAction::All || *a == action))
    }
}

/// Why consent was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsentError {
    #[error("target patient could not be determined")]
    PatientUnresolved,

    #[error("consent denied by directive {0}")]
    Denied(String),

    #[error("no active consent permits this access")]
    NoPermit,

    #[error("consent lookup timed out")]
    Timeout,

    #[error("consent lookup cancelled")]
    Cancelled,

    #[error("consent lookup failed: {0}")]
    Lookup(String),
}

/// Applies patient consent directives to requests.
#[derive(Clone)]
pub struct ConsentEnforcer {
    storage: Arc<dyn ConsentStorage>,
    timeout: Duration,
}

impl ConsentEnforcer {
    #[must_use]
    pub fn new(storage: Arc<dyn ConsentStorage>, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn ConsentStorage> {
        &self.storage
    }

    /// Checks that `identity` may perform `action` on data of `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConsentError`] describing the refusal.
    pub async fn check(
        &self,
        identity: &RequestIdentity,
        patient_id: Option<&str>,
        action: ConsentAction,
    ) -> Result<(), ConsentError> {
        self.check_cancellable(identity, patient_id, action, &CancellationToken::new())
            .await
    }

    /// Same as [`check`](Self::check), but denies as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`ConsentError`] describing the refusal.
    pub async fn check_cancellable(
        &self,
        identity: &RequestIdentity,
        patient_id: Option<&str>,
        action: ConsentAction,
        cancel: &CancellationToken,
    ) -> Result<(), ConsentError> {
        if identity.is_admin() {
            return Ok(());
        }
        let patient_id = patient_id.ok_or(ConsentError::PatientUnresolved)?;

        let lookup = tokio::time::timeout(
            self.timeout,
            self.storage.directives_for_patient(patient_id),
        );
        let directives = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsentError::Cancelled),
            result = lookup => match result {
                Err(_) => return Err(ConsentError::Timeout),
                Ok(Err(e)) => return Err(ConsentError::Lookup(e.to_string())),
                Ok(Ok(directives)) => directives,
            },
        };

        let now = OffsetDateTime::now_utc();
        let applicable: Vec<_> = directives
            .iter()
            .filter(|d| d.applies(action, now))
            .collect();

        if let Some(denial) = applicable.iter().find(|d| d.kind == ConsentKind::Deny) {
            return Err(ConsentError::Denied(denial.id.clone()));
        }
        if applicable.iter().any(|d| d.kind == ConsentKind::Permit) {
            Ok(())
        } else {
            Err(ConsentError::NoPermit)
        }
    }
}
