use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{SubmissionStatus, TemplateId};
use crate::workflows::deadline::Interruption;
use crate::workflows::employees::FieldMap;

/// Template definition as the provider reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTemplate {
    pub id: TemplateId,
    pub name: String,
    pub folder: Option<String>,
    pub field_names: Vec<String>,
    pub signer_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitterRequest {
    pub role: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub values: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
}

/// Everything needed to open one submission. Submitters sign in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    pub template_id: TemplateId,
    pub submitters: Vec<SubmitterRequest>,
    pub send_email: bool,
    pub message: Option<EmailMessage>,
}

/// Single shape every provider response is reduced to at the client boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalSubmission {
    pub id: String,
    pub status: Option<SubmissionStatus>,
    pub submitters: Vec<CanonicalSubmitter>,
    pub documents_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalSubmitter {
    pub id: String,
    pub slug: Option<String>,
    pub email: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub status: Option<SubmissionStatus>,
    pub embed_src: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub values: FieldMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDocument {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("document provider rejected credentials")]
    Unauthorized,
    #[error("document provider has no {0}")]
    NotFound(String),
    #[error("document provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("document provider unavailable: {0}")]
    Unavailable(String),
    #[error("unrecognized document provider response: {0}")]
    Decode(String),
    #[error("document provider call interrupted: {0}")]
    Interrupted(#[from] Interruption),
}

/// External e-signature service.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn list_templates(&self) -> Result<Vec<ProviderTemplate>, ProviderError>;
    async fn create_submission(
        &self,
        request: &SubmissionRequest,
    ) -> Result<CanonicalSubmission, ProviderError>;
    async fn get_submission(&self, id: &str) -> Result<CanonicalSubmission, ProviderError>;
    /// Re-send signing emails to one submitter, or to every submitter still pending.
    async fn remind_submission(
        &self,
        id: &str,
        submitter_id: Option<&str>,
    ) -> Result<(), ProviderError>;
    async fn list_documents(&self, submission_id: &str) -> Result<Vec<ProviderDocument>, ProviderError>;
    async fn download_document(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}
