//! Consent directive storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::policy::ConsentDirective;

/// Source of patient consent directives.
///
/// In a full deployment this is backed by the clinical data store; the
/// enforcement layer bounds every lookup with a timeout and denies on error.
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    /// Inserts or replaces a directive.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn put(&self, directive: ConsentDirective) -> AuthResult<()>;

    /// All directives recorded for a patient, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn directives_for_patient(&self, patient_id: &str)
    -> AuthResult<Vec<ConsentDirective>>;
}
