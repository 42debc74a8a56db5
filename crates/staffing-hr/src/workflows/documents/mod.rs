//! E-signature workflow: templates, dual-signer submissions, status
//! reconciliation, reminders, and archival of signed documents.

pub mod docuseal;
pub mod domain;
pub mod orchestrator;
pub mod prefill;
pub mod provider;
pub mod repository;
pub mod response;
pub mod router;
pub mod signers;

#[cfg(test)]
pub(crate) mod tests;

pub use docuseal::DocusealClient;
pub use domain::{
    ArchivedDocument, DocusealTemplate, FormSubmission, FormSubmissionId, SignerRole,
    SignerSnapshot, SubmissionData, SubmissionStatus, TemplateId, TemplateSettings,
};
pub use orchestrator::{
    BulkSendReport, DocumentCollaborators, DocumentError, DocumentSettings,
    DocumentWorkflowOrchestrator, HrSigner, ReminderOutcome, SendForm, TemplateFailure,
};
pub use provider::{
    CanonicalSubmission, CanonicalSubmitter, DocumentProvider, EmailMessage, ProviderDocument,
    ProviderError, ProviderTemplate, SubmissionRequest, SubmitterRequest,
};
pub use repository::{FormSubmissionRepository, RepositoryError, TemplateRepository};
pub use router::document_router;
