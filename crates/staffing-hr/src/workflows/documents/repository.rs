use super::domain::{DocusealTemplate, FormSubmission, FormSubmissionId, TemplateId};
use crate::workflows::employees::EmployeeId;
use crate::workflows::onboarding::InvitationId;

/// Local database of record for submissions routed through the provider.
pub trait FormSubmissionRepository: Send + Sync {
    fn insert(&self, submission: FormSubmission) -> Result<FormSubmission, RepositoryError>;
    fn update(&self, submission: FormSubmission) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &FormSubmissionId) -> Result<Option<FormSubmission>, RepositoryError>;
    /// Lookup by the provider-side submission id.
    fn fetch_by_external(&self, submission_id: &str) -> Result<Option<FormSubmission>, RepositoryError>;
    fn for_employee(&self, employee_id: &EmployeeId) -> Result<Vec<FormSubmission>, RepositoryError>;
    fn for_invitation(&self, invitation_id: &InvitationId) -> Result<Vec<FormSubmission>, RepositoryError>;
}

/// Cached provider templates plus their locally managed flags.
pub trait TemplateRepository: Send + Sync {
    fn fetch(&self, id: &TemplateId) -> Result<Option<DocusealTemplate>, RepositoryError>;
    fn upsert(&self, template: DocusealTemplate) -> Result<DocusealTemplate, RepositoryError>;
    fn list(&self) -> Result<Vec<DocusealTemplate>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
