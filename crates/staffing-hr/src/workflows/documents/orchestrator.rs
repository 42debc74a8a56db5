use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::domain::{
    ArchivedDocument, DocusealTemplate, FormSubmission, FormSubmissionId, SignerRole,
    SubmissionData, SubmissionStatus, TemplateId, TemplateSettings,
};
use super::prefill::employee_values;
use super::provider::{
    CanonicalSubmission, CanonicalSubmitter, DocumentProvider, EmailMessage, ProviderError,
    SubmissionRequest, SubmitterRequest,
};
use super::repository::{FormSubmissionRepository, RepositoryError, TemplateRepository};
use super::signers::{overall_status, requires_hr_signature, resolve_roles, snapshot, SignerRoles};
use crate::config::{DocusealConfig, WorkflowConfig};
use crate::error::ErrorKind;
use crate::integrations::cipher::SecretCodec;
use crate::integrations::storage::{ObjectStore, StorageError};
use crate::workflows::clock::Clock;
use crate::workflows::deadline::{bounded, Interruption};
use crate::workflows::employees::{Employee, EmployeeId, EntityPersistenceGateway, GatewayError};
use crate::workflows::onboarding::{InvitationId, InvitationRepository};

const REMINDER_INTERVAL_HOURS: i64 = 1;
const ARCHIVE_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("employee {0} not found")]
    EmployeeNotFound(EmployeeId),
    #[error("template {0} not found; sync templates from the provider first")]
    TemplateNotFound(TemplateId),
    #[error("form submission {0} not found")]
    SubmissionNotFound(String),
    #[error("invitation {0} not found")]
    InvitationNotFound(InvitationId),
    #[error("archived document {0} not found")]
    DocumentNotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("document provider rejected credentials")]
    Unauthorized,
    #[error("document provider error: {0}")]
    Provider(String),
    #[error("document call interrupted: {0}")]
    Interrupted(Interruption),
    #[error("employee lookup failed: {0}")]
    Persistence(GatewayError),
    #[error("object store error: {0}")]
    Storage(#[from] StorageError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::ServiceUnavailable(_) | DocumentError::Interrupted(_) => {
                ErrorKind::ServiceUnavailable
            }
            DocumentError::EmployeeNotFound(_)
            | DocumentError::TemplateNotFound(_)
            | DocumentError::SubmissionNotFound(_)
            | DocumentError::InvitationNotFound(_)
            | DocumentError::DocumentNotFound(_) => ErrorKind::NotFound,
            DocumentError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DocumentError::Unauthorized => ErrorKind::Unauthorized,
            DocumentError::Provider(_) => ErrorKind::Provider,
            DocumentError::Persistence(err) => err.kind(),
            DocumentError::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            DocumentError::Storage(StorageError::InvalidKey(_)) => ErrorKind::InvalidRequest,
            DocumentError::Storage(_) => ErrorKind::ServiceUnavailable,
            DocumentError::Repository(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            DocumentError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            DocumentError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            DocumentError::SubmissionNotFound(_) => "SUBMISSION_NOT_FOUND",
            DocumentError::InvitationNotFound(_) => "INVITATION_NOT_FOUND",
            DocumentError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            DocumentError::InvalidRequest(_) => "INVALID_REQUEST",
            DocumentError::Unauthorized => "UNAUTHORIZED",
            DocumentError::Provider(_) => "DOCUSEAL_ERROR",
            DocumentError::Interrupted(Interruption::Cancelled) => "CANCELLED",
            DocumentError::Interrupted(Interruption::TimedOut(_)) => "TIMEOUT",
            DocumentError::Persistence(err) => err.code(),
            DocumentError::Storage(_) => "STORAGE_ERROR",
            DocumentError::Repository(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ProviderError> for DocumentError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Unauthorized => DocumentError::Unauthorized,
            ProviderError::Unavailable(message) => DocumentError::ServiceUnavailable(message),
            ProviderError::Interrupted(interruption) => DocumentError::Interrupted(interruption),
            other => DocumentError::Provider(other.to_string()),
        }
    }
}

impl From<Interruption> for DocumentError {
    fn from(value: Interruption) -> Self {
        DocumentError::Interrupted(value)
    }
}

/// Identity used for the counter-signature on agreements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrSigner {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub call_timeout: Duration,
    pub submission_expiry_days: i64,
    /// Base URL signing links are built on.
    pub app_url: String,
    pub hr_signer: Option<HrSigner>,
}

impl DocumentSettings {
    pub fn from_config(workflow: &WorkflowConfig, docuseal: Option<&DocusealConfig>) -> Self {
        Self {
            call_timeout: workflow.call_timeout,
            submission_expiry_days: workflow.submission_expiry_days,
            app_url: docuseal
                .map(|config| config.app_url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            hr_signer: docuseal.and_then(|config| {
                config.hr_signer_email.as_ref().map(|email| HrSigner {
                    email: email.clone(),
                    name: config.hr_signer_name.clone(),
                })
            }),
        }
    }
}

/// Collaborators injected into the orchestrator. `provider` is `None` when the
/// e-signature service is not configured.
pub struct DocumentCollaborators {
    pub provider: Option<Arc<dyn DocumentProvider>>,
    pub employees: Arc<dyn EntityPersistenceGateway>,
    pub submissions: Arc<dyn FormSubmissionRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
    pub codec: Arc<dyn SecretCodec>,
    pub store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
}

/// Parameters for routing one template to one employee.
#[derive(Debug, Clone, PartialEq)]
pub struct SendForm {
    pub employee_id: EmployeeId,
    pub template_id: TemplateId,
    pub created_by: String,
    pub is_onboarding: bool,
    pub invitation_id: Option<InvitationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFailure {
    pub template_id: TemplateId,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

/// Outcome of a bulk send: every template is attempted regardless of earlier failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendReport {
    pub sent: Vec<FormSubmission>,
    pub failed: Vec<TemplateFailure>,
    /// Live submissions from an earlier send; their templates are not sent again.
    pub already_sent: Vec<FormSubmission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderOutcome {
    pub success: bool,
    pub message: String,
}

/// Drives e-signature submissions from creation through completion and archival.
pub struct DocumentWorkflowOrchestrator {
    provider: Option<Arc<dyn DocumentProvider>>,
    employees: Arc<dyn EntityPersistenceGateway>,
    submissions: Arc<dyn FormSubmissionRepository>,
    templates: Arc<dyn TemplateRepository>,
    invitations: Arc<dyn InvitationRepository>,
    codec: Arc<dyn SecretCodec>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    settings: DocumentSettings,
}

impl DocumentWorkflowOrchestrator {
    pub fn new(collaborators: DocumentCollaborators, settings: DocumentSettings) -> Self {
        Self {
            provider: collaborators.provider,
            employees: collaborators.employees,
            submissions: collaborators.submissions,
            templates: collaborators.templates,
            invitations: collaborators.invitations,
            codec: collaborators.codec,
            store: collaborators.store,
            clock: collaborators.clock,
            settings,
        }
    }

    fn provider(&self) -> Result<&Arc<dyn DocumentProvider>, DocumentError> {
        self.provider.as_ref().ok_or_else(|| {
            DocumentError::ServiceUnavailable("document provider is not configured".to_string())
        })
    }

    /// Accepts either the local row id or the provider's submission id.
    fn find_submission(&self, id: &str) -> Result<Option<FormSubmission>, DocumentError> {
        if let Some(found) = self.submissions.fetch(&FormSubmissionId(id.to_string()))? {
            return Ok(Some(found));
        }
        Ok(self.submissions.fetch_by_external(id)?)
    }

    fn require_submission(&self, id: &str) -> Result<FormSubmission, DocumentError> {
        self.find_submission(id)?
            .ok_or_else(|| DocumentError::SubmissionNotFound(id.to_string()))
    }

    async fn load_employee(
        &self,
        employee_id: &EmployeeId,
        cancel: &CancellationToken,
    ) -> Result<Employee, DocumentError> {
        let found = bounded(
            cancel,
            self.settings.call_timeout,
            self.employees.get_employee(employee_id),
        )
        .await?
        .map_err(|err| match err {
            GatewayError::NotFound(_) => DocumentError::EmployeeNotFound(employee_id.clone()),
            other => DocumentError::Persistence(other),
        })?;
        found.ok_or_else(|| DocumentError::EmployeeNotFound(employee_id.clone()))
    }

    /// Pull the provider's template list and upsert local rows, keeping the
    /// flags operators manage locally.
    #[tracing::instrument(skip_all)]
    pub async fn sync_templates(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocusealTemplate>, DocumentError> {
        let provider = self.provider()?;
        let remote = bounded(cancel, self.settings.call_timeout, provider.list_templates())
            .await
            .map_err(ProviderError::from)??;
        let now = self.clock.now();

        let mut synced = Vec::with_capacity(remote.len());
        for template in remote {
            let existing = self.templates.fetch(&template.id)?;
            let merged = DocusealTemplate {
                category: match &existing {
                    Some(local) => local.category.clone(),
                    None => template.folder.clone(),
                },
                required_for_onboarding: existing
                    .as_ref()
                    .is_some_and(|local| local.required_for_onboarding),
                requires_hr_signature: existing.as_ref().and_then(|local| local.requires_hr_signature),
                id: template.id,
                name: template.name,
                field_names: template.field_names,
                signer_roles: template.signer_roles,
                synced_at: Some(now),
            };
            synced.push(self.templates.upsert(merged)?);
        }
        tracing::info!(count = synced.len(), "templates synced");
        Ok(synced)
    }

    pub fn list_templates(&self) -> Result<Vec<DocusealTemplate>, DocumentError> {
        Ok(self.templates.list()?)
    }

    /// Change the locally managed flags of one template.
    pub fn update_template_settings(
        &self,
        template_id: &TemplateId,
        settings: TemplateSettings,
    ) -> Result<DocusealTemplate, DocumentError> {
        let mut template = self
            .templates
            .fetch(template_id)?
            .ok_or_else(|| DocumentError::TemplateNotFound(template_id.clone()))?;
        if let Some(required) = settings.required_for_onboarding {
            template.required_for_onboarding = required;
        }
        if let Some(requires_hr) = settings.requires_hr_signature {
            template.requires_hr_signature = requires_hr;
        }
        if let Some(category) = settings.category {
            template.category = category;
        }
        Ok(self.templates.upsert(template)?)
    }

    /// Open a provider submission for one employee and template and record it locally.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(employee_id = %request.employee_id, template_id = %request.template_id)
    )]
    pub async fn send_form_to_employee(
        &self,
        request: SendForm,
        cancel: &CancellationToken,
    ) -> Result<FormSubmission, DocumentError> {
        let provider = self.provider()?;
        let employee = self.load_employee(&request.employee_id, cancel).await?;
        let template = self
            .templates
            .fetch(&request.template_id)?
            .ok_or_else(|| DocumentError::TemplateNotFound(request.template_id.clone()))?;
        let email = employee
            .deliverable_email()
            .map(str::to_string)
            .ok_or_else(|| {
                DocumentError::InvalidRequest(format!(
                    "employee {} has no work email to send {} to",
                    employee.id, template.name
                ))
            })?;

        let needs_hr = requires_hr_signature(&template);
        let roles = resolve_roles(&template.signer_roles);
        let hr_signer = match (needs_hr, &self.settings.hr_signer) {
            (true, Some(signer)) => Some(signer.clone()),
            (true, None) => {
                return Err(DocumentError::ServiceUnavailable(format!(
                    "{} needs an HR signature but no HR signer is configured",
                    template.name
                )))
            }
            (false, _) => None,
        };

        let now = self.clock.now();
        let recipient_name = match employee.full_name() {
            name if name.is_empty() => email.clone(),
            name => name,
        };
        let values = employee_values(
            &employee,
            &template.field_names,
            self.codec.as_ref(),
            now.date_naive(),
        );

        let mut submitters = vec![SubmitterRequest {
            role: roles.employee.clone(),
            email: email.clone(),
            name: recipient_name.clone(),
            values,
        }];
        if let Some(signer) = &hr_signer {
            submitters.push(SubmitterRequest {
                role: roles.hr.clone(),
                email: signer.email.clone(),
                name: signer.name.clone(),
                values: Default::default(),
            });
        }
        let submission_request = SubmissionRequest {
            template_id: template.id.clone(),
            submitters,
            send_email: true,
            message: Some(EmailMessage {
                subject: format!("Please sign: {}", template.name),
                body: format!(
                    "Hello {recipient_name},\n\nPlease review and sign {}: {{{{submitter.link}}}}",
                    template.name
                ),
            }),
        };

        let remote = bounded(
            cancel,
            self.settings.call_timeout,
            provider.create_submission(&submission_request),
        )
        .await
        .map_err(ProviderError::from)??;

        let data = snapshot(
            &remote,
            &roles,
            &self.settings.app_url,
            needs_hr,
            &SubmissionData::default(),
        );
        let status = overall_status(&remote, &data);
        let employee_submitter = employee_submitter(&remote, &data);

        let submission = FormSubmission {
            id: FormSubmissionId::generate(),
            submission_id: remote.id.clone(),
            employee_id: employee.id.clone(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            invitation_id: request.invitation_id,
            is_onboarding: request.is_onboarding,
            required: request.is_onboarding,
            recipient_email: email,
            recipient_name,
            status,
            created_by: request.created_by,
            created_at: now,
            sent_at: employee_submitter
                .and_then(|submitter| submitter.sent_at)
                .or_else(|| (status != SubmissionStatus::Pending).then_some(now)),
            opened_at: employee_submitter.and_then(|submitter| submitter.opened_at),
            completed_at: remote.completed_at,
            expires_at: now + ChronoDuration::days(self.settings.submission_expiry_days),
            documents_url: remote.documents_url.clone(),
            submission_data: data,
            reminder_count: 0,
            last_reminder_at: None,
            next_reminder_at: None,
            archived_documents: Vec::new(),
        };
        let stored = self.submissions.insert(submission)?;
        tracing::info!(
            submission_id = %stored.submission_id,
            status = %stored.status,
            requires_hr_signature = needs_hr,
            "form sent for signature"
        );
        Ok(stored)
    }

    /// Send every onboarding form for an invitation, one template at a time.
    /// A failed template is reported and the rest are still attempted. Templates
    /// that already have an unexpired submission for the invitation are skipped,
    /// so repeating the call only retries what is missing.
    #[tracing::instrument(skip_all, fields(invitation_id = %invitation_id, employee_id = %employee_id))]
    pub async fn send_onboarding_forms(
        &self,
        invitation_id: &InvitationId,
        employee_id: &EmployeeId,
        created_by: &str,
        cancel: &CancellationToken,
    ) -> Result<BulkSendReport, DocumentError> {
        self.provider()?;
        let invitation = self
            .invitations
            .fetch(invitation_id)?
            .ok_or_else(|| DocumentError::InvitationNotFound(invitation_id.clone()))?;

        let template_ids: Vec<TemplateId> = if invitation.template_ids.is_empty() {
            self.templates
                .list()?
                .into_iter()
                .filter(|template| template.required_for_onboarding)
                .map(|template| template.id)
                .collect()
        } else {
            invitation.template_ids.clone()
        };

        let existing = self.submissions.for_invitation(invitation_id)?;
        let mut report = BulkSendReport {
            sent: Vec::new(),
            failed: Vec::new(),
            already_sent: Vec::new(),
        };
        for template_id in template_ids {
            if let Some(live) = existing.iter().find(|submission| {
                submission.template_id == template_id && submission.status != SubmissionStatus::Expired
            }) {
                tracing::debug!(
                    template_id = %template_id,
                    submission_id = %live.submission_id,
                    "onboarding form already sent"
                );
                report.already_sent.push(live.clone());
                continue;
            }
            let request = SendForm {
                employee_id: employee_id.clone(),
                template_id: template_id.clone(),
                created_by: created_by.to_string(),
                is_onboarding: true,
                invitation_id: Some(invitation_id.clone()),
            };
            match self.send_form_to_employee(request, cancel).await {
                Ok(submission) => report.sent.push(submission),
                Err(err) => {
                    tracing::warn!(template_id = %template_id, error = %err, "onboarding form not sent");
                    report.failed.push(TemplateFailure {
                        template_id,
                        kind: err.kind(),
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            sent = report.sent.len(),
            failed = report.failed.len(),
            skipped = report.already_sent.len(),
            "onboarding forms dispatched"
        );
        Ok(report)
    }

    /// True when no required form is outstanding for the invitation.
    pub fn are_onboarding_forms_completed(
        &self,
        invitation_id: &InvitationId,
    ) -> Result<bool, DocumentError> {
        let submissions = self.submissions.for_invitation(invitation_id)?;
        Ok(submissions
            .iter()
            .filter(|submission| submission.required)
            .all(|submission| submission.status == SubmissionStatus::Completed))
    }

    /// Reconcile one local row with the provider. Unknown ids yield `None`.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn update_submission_status(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FormSubmission>, DocumentError> {
        let Some(mut record) = self.find_submission(id)? else {
            tracing::debug!("no local submission to reconcile");
            return Ok(None);
        };
        let provider = self.provider()?;
        let remote = bounded(
            cancel,
            self.settings.call_timeout,
            provider.get_submission(&record.submission_id),
        )
        .await
        .map_err(ProviderError::from)??;

        let roles = self.roles_for(&record)?;
        let data = snapshot(
            &remote,
            &roles,
            &self.settings.app_url,
            record.submission_data.requires_hr_signature,
            &record.submission_data,
        );
        let observed = overall_status(&remote, &data);
        let now = self.clock.now();

        if record.status.can_become(observed) {
            if record.status != observed {
                tracing::info!(
                    submission_id = %record.submission_id,
                    from = %record.status,
                    to = %observed,
                    "submission status changed"
                );
            }
            record.status = observed;
        } else {
            tracing::warn!(
                submission_id = %record.submission_id,
                current = %record.status,
                observed = %observed,
                "refusing submission status regression"
            );
        }

        let signer = employee_submitter(&remote, &data);
        record.sent_at = record
            .sent_at
            .or_else(|| signer.and_then(|submitter| submitter.sent_at));
        record.opened_at = record
            .opened_at
            .or_else(|| signer.and_then(|submitter| submitter.opened_at));
        if record.status == SubmissionStatus::Completed && record.completed_at.is_none() {
            record.completed_at = remote
                .completed_at
                .or_else(|| signer.and_then(|submitter| submitter.completed_at))
                .or(Some(now));
        }
        if remote.documents_url.is_some() {
            record.documents_url = remote.documents_url.clone();
        }
        record.submission_data = data;

        self.submissions.update(record.clone())?;
        Ok(Some(record))
    }

    fn roles_for(&self, record: &FormSubmission) -> Result<SignerRoles, DocumentError> {
        let declared = self
            .templates
            .fetch(&record.template_id)?
            .map(|template| template.signer_roles)
            .unwrap_or_default();
        let mut roles = resolve_roles(&declared);
        if let Some(signer) = record.submission_data.signer(SignerRole::Employee) {
            roles.employee = signer.provider_role.clone();
        }
        if let Some(signer) = record.submission_data.signer(SignerRole::Hr) {
            roles.hr = signer.provider_role.clone();
        }
        Ok(roles)
    }

    /// Re-send signing emails. A named signer that is not part of the
    /// submission is reported as an unsuccessful outcome.
    #[tracing::instrument(skip(self, signer_email, cancel))]
    pub async fn send_reminder(
        &self,
        id: &str,
        signer_email: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ReminderOutcome, DocumentError> {
        let mut record = self.require_submission(id)?;
        if record.status.is_terminal() {
            return Ok(ReminderOutcome {
                success: false,
                message: format!("submission is already {}", record.status),
            });
        }

        let submitter_id = match signer_email {
            Some(email) => match record.submission_data.signer_by_email(email) {
                Some(signer) => Some(signer.submitter_id.clone()),
                None => {
                    return Ok(ReminderOutcome {
                        success: false,
                        message: format!("{email} is not a signer on this submission"),
                    })
                }
            },
            None => None,
        };

        let provider = self.provider()?;
        bounded(
            cancel,
            self.settings.call_timeout,
            provider.remind_submission(&record.submission_id, submitter_id.as_deref()),
        )
        .await
        .map_err(ProviderError::from)??;

        let now = self.clock.now();
        record.reminder_count += 1;
        record.last_reminder_at = Some(now);
        record.next_reminder_at = Some(now + ChronoDuration::hours(REMINDER_INTERVAL_HOURS));
        self.submissions.update(record.clone())?;
        tracing::info!(
            submission_id = %record.submission_id,
            reminders = record.reminder_count,
            "reminder sent"
        );

        let message = match signer_email {
            Some(email) => format!("reminder sent to {email}"),
            None => "reminder sent to all pending signers".to_string(),
        };
        Ok(ReminderOutcome {
            success: true,
            message,
        })
    }

    /// Copy the signed files of a completed submission into the object store.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn archive_documents(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<FormSubmission, DocumentError> {
        let mut record = self.require_submission(id)?;
        if record.status != SubmissionStatus::Completed {
            return Err(DocumentError::InvalidRequest(format!(
                "submission {} is {}, only completed submissions can be archived",
                record.submission_id, record.status
            )));
        }
        let provider = self.provider()?;
        let documents = bounded(
            cancel,
            self.settings.call_timeout,
            provider.list_documents(&record.submission_id),
        )
        .await
        .map_err(ProviderError::from)??;

        let metadata = BTreeMap::from([
            ("employee-id".to_string(), record.employee_id.0.clone()),
            ("submission-id".to_string(), record.submission_id.clone()),
            ("template-id".to_string(), record.template_id.0.clone()),
        ]);

        for document in documents {
            let bytes = bounded(
                cancel,
                self.settings.call_timeout,
                provider.download_document(&document.url),
            )
            .await
            .map_err(ProviderError::from)??;
            let name = archive_name(&document.name);
            let key = format!(
                "employees/{}/forms/{}/{}",
                record.employee_id, record.submission_id, name
            );
            let receipt = bounded(
                cancel,
                self.settings.call_timeout,
                self.store.put(&key, bytes, ARCHIVE_CONTENT_TYPE, &metadata),
            )
            .await??;
            record.archived_documents.retain(|archived| archived.key != key);
            record.archived_documents.push(ArchivedDocument {
                name,
                key,
                etag: receipt.etag,
                archived_at: self.clock.now(),
            });
        }

        self.submissions.update(record.clone())?;
        tracing::info!(
            submission_id = %record.submission_id,
            documents = record.archived_documents.len(),
            "signed documents archived"
        );
        Ok(record)
    }

    /// Time-limited link to an archived document.
    pub async fn signed_document_url(
        &self,
        id: &str,
        name: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DocumentError> {
        let record = self.require_submission(id)?;
        let wanted = archive_name(name);
        let document = record
            .archived_documents
            .iter()
            .find(|document| document.name == name || document.name == wanted)
            .ok_or_else(|| DocumentError::DocumentNotFound(name.to_string()))?;
        let url = bounded(
            cancel,
            self.settings.call_timeout,
            self.store.sign(&document.key, ttl),
        )
        .await??;
        Ok(url)
    }

    pub fn submissions_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<FormSubmission>, DocumentError> {
        Ok(self.submissions.for_employee(employee_id)?)
    }

    pub fn submissions_for_invitation(
        &self,
        invitation_id: &InvitationId,
    ) -> Result<Vec<FormSubmission>, DocumentError> {
        Ok(self.submissions.for_invitation(invitation_id)?)
    }

    pub fn submission(&self, id: &str) -> Result<FormSubmission, DocumentError> {
        self.require_submission(id)
    }
}

fn employee_submitter<'a>(
    remote: &'a CanonicalSubmission,
    data: &SubmissionData,
) -> Option<&'a CanonicalSubmitter> {
    let wanted = data.signer(SignerRole::Employee)?;
    remote
        .submitters
        .iter()
        .find(|submitter| submitter.id == wanted.submitter_id)
}

/// File name safe for an object key, always ending in `.pdf`.
fn archive_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let base = if cleaned.is_empty() { "document" } else { cleaned };
    if base.to_ascii_lowercase().ends_with(".pdf") {
        base.to_string()
    } else {
        format!("{base}.pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_are_key_safe() {
        assert_eq!(archive_name("W-4 Form"), "W-4_Form.pdf");
        assert_eq!(archive_name("agreement.PDF"), "agreement.PDF");
        assert_eq!(archive_name("../../etc/passwd"), "_.._etc_passwd.pdf");
        assert_eq!(archive_name("  "), "document.pdf");
    }

    #[test]
    fn provider_errors_map_to_document_codes() {
        assert_eq!(DocumentError::from(ProviderError::Unauthorized).code(), "UNAUTHORIZED");
        assert_eq!(
            DocumentError::from(ProviderError::Rejected {
                status: 422,
                message: "bad".to_string()
            })
            .code(),
            "DOCUSEAL_ERROR"
        );
        assert_eq!(
            DocumentError::from(ProviderError::Unavailable("down".to_string())).kind(),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(
            DocumentError::from(ProviderError::Interrupted(Interruption::Cancelled)).code(),
            "CANCELLED"
        );
    }
}
