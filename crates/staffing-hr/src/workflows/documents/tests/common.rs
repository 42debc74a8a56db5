use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use crate::integrations::cipher::SecretCodec;
use crate::integrations::storage::LocalObjectStore;
use crate::workflows::clock::FixedClock;
use crate::workflows::documents::domain::{
    DocusealTemplate, FormSubmission, FormSubmissionId, SubmissionStatus, TemplateId,
};
use crate::workflows::documents::orchestrator::{
    DocumentCollaborators, DocumentSettings, DocumentWorkflowOrchestrator, HrSigner,
};
use crate::workflows::documents::provider::{
    CanonicalSubmission, CanonicalSubmitter, DocumentProvider, ProviderDocument, ProviderError,
    ProviderTemplate, SubmissionRequest,
};
use crate::workflows::documents::repository::{
    FormSubmissionRepository, RepositoryError, TemplateRepository,
};
use crate::workflows::employees::tests::common::{codec, fields, MemoryGateway};
use crate::workflows::employees::EmployeeId;
use crate::workflows::onboarding::{
    EmployeeInvitation, InvitationId, InvitationRepository, InvitationStatus,
};

pub(crate) const APP_URL: &str = "https://sign.example.com";

pub(crate) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[derive(Default)]
pub(crate) struct MemorySubmissions {
    rows: Mutex<BTreeMap<FormSubmissionId, FormSubmission>>,
}

impl MemorySubmissions {
    pub(crate) fn all(&self) -> Vec<FormSubmission> {
        self.rows
            .lock()
            .expect("submission mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl FormSubmissionRepository for MemorySubmissions {
    fn insert(&self, submission: FormSubmission) -> Result<FormSubmission, RepositoryError> {
        let mut rows = self.rows.lock().expect("submission mutex poisoned");
        if rows.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }
        rows.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(&self, submission: FormSubmission) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("submission mutex poisoned");
        match rows.get_mut(&submission.id) {
            Some(row) => {
                *row = submission;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &FormSubmissionId) -> Result<Option<FormSubmission>, RepositoryError> {
        Ok(self.rows.lock().expect("submission mutex poisoned").get(id).cloned())
    }

    fn fetch_by_external(&self, submission_id: &str) -> Result<Option<FormSubmission>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("submission mutex poisoned")
            .values()
            .find(|row| row.submission_id == submission_id)
            .cloned())
    }

    fn for_employee(&self, employee_id: &EmployeeId) -> Result<Vec<FormSubmission>, RepositoryError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|row| &row.employee_id == employee_id)
            .collect())
    }

    fn for_invitation(&self, invitation_id: &InvitationId) -> Result<Vec<FormSubmission>, RepositoryError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|row| row.invitation_id.as_ref() == Some(invitation_id))
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryTemplates {
    rows: Mutex<BTreeMap<TemplateId, DocusealTemplate>>,
}

impl TemplateRepository for MemoryTemplates {
    fn fetch(&self, id: &TemplateId) -> Result<Option<DocusealTemplate>, RepositoryError> {
        Ok(self.rows.lock().expect("template mutex poisoned").get(id).cloned())
    }

    fn upsert(&self, template: DocusealTemplate) -> Result<DocusealTemplate, RepositoryError> {
        self.rows
            .lock()
            .expect("template mutex poisoned")
            .insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn list(&self) -> Result<Vec<DocusealTemplate>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("template mutex poisoned")
            .values()
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryInvitations {
    rows: Mutex<BTreeMap<InvitationId, EmployeeInvitation>>,
    fail_updates: AtomicBool,
}

impl MemoryInvitations {
    pub(crate) fn fail_updates(&self, failing: bool) {
        self.fail_updates.store(failing, Ordering::SeqCst);
    }
}

impl InvitationRepository for MemoryInvitations {
    fn insert(&self, invitation: EmployeeInvitation) -> Result<EmployeeInvitation, RepositoryError> {
        let mut rows = self.rows.lock().expect("invitation mutex poisoned");
        if rows.contains_key(&invitation.id) {
            return Err(RepositoryError::Conflict);
        }
        rows.insert(invitation.id.clone(), invitation.clone());
        Ok(invitation)
    }

    fn update(&self, invitation: EmployeeInvitation) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("invitation store offline".to_string()));
        }
        let mut rows = self.rows.lock().expect("invitation mutex poisoned");
        match rows.get_mut(&invitation.id) {
            Some(row) => {
                *row = invitation;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &InvitationId) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        Ok(self.rows.lock().expect("invitation mutex poisoned").get(id).cloned())
    }

    fn fetch_by_token(&self, token: &str) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("invitation mutex poisoned")
            .values()
            .find(|row| row.token == token)
            .cloned())
    }

    fn list(&self) -> Result<Vec<EmployeeInvitation>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("invitation mutex poisoned")
            .values()
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ProviderState {
    templates: Vec<ProviderTemplate>,
    submissions: BTreeMap<String, CanonicalSubmission>,
    requests: Vec<SubmissionRequest>,
    reminders: Vec<(String, Option<String>)>,
    documents: BTreeMap<String, Vec<(ProviderDocument, Vec<u8>)>>,
    fail_create_for: Vec<(TemplateId, ProviderError)>,
    next_id: u64,
}

/// Provider double that opens submissions in `sent` state and lets tests
/// script later signer progress.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    state: Mutex<ProviderState>,
}

impl ScriptedProvider {
    pub(crate) fn with_templates(templates: Vec<ProviderTemplate>) -> Self {
        let provider = Self::default();
        provider.state.lock().expect("provider mutex poisoned").templates = templates;
        provider
    }

    pub(crate) fn fail_create_for(&self, template_id: &str, error: ProviderError) {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .fail_create_for
            .push((TemplateId(template_id.to_string()), error));
    }

    pub(crate) fn clear_failures(&self) {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .fail_create_for
            .clear();
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.state.lock().expect("provider mutex poisoned").requests.len()
    }

    pub(crate) fn requests(&self) -> Vec<SubmissionRequest> {
        self.state.lock().expect("provider mutex poisoned").requests.clone()
    }

    pub(crate) fn reminders(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().expect("provider mutex poisoned").reminders.clone()
    }

    /// Move the signer holding `role` to `status`.
    pub(crate) fn set_signer_status(&self, submission_id: &str, role: &str, status: SubmissionStatus) {
        let mut state = self.state.lock().expect("provider mutex poisoned");
        if let Some(submission) = state.submissions.get_mut(submission_id) {
            for submitter in &mut submission.submitters {
                if submitter.role.as_deref() == Some(role) {
                    submitter.status = Some(status);
                    if status == SubmissionStatus::Completed {
                        submitter.completed_at = Some(fixed_now());
                    }
                }
            }
        }
    }

    pub(crate) fn set_submission_status(&self, submission_id: &str, status: Option<SubmissionStatus>) {
        let mut state = self.state.lock().expect("provider mutex poisoned");
        if let Some(submission) = state.submissions.get_mut(submission_id) {
            submission.status = status;
        }
    }

    pub(crate) fn attach_document(&self, submission_id: &str, name: &str, bytes: &[u8]) {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .documents
            .entry(submission_id.to_string())
            .or_default()
            .push((
                ProviderDocument {
                    name: name.to_string(),
                    url: format!("https://files.example.com/{submission_id}/{name}"),
                },
                bytes.to_vec(),
            ));
    }
}

#[async_trait]
impl DocumentProvider for ScriptedProvider {
    async fn list_templates(&self) -> Result<Vec<ProviderTemplate>, ProviderError> {
        Ok(self.state.lock().expect("provider mutex poisoned").templates.clone())
    }

    async fn create_submission(
        &self,
        request: &SubmissionRequest,
    ) -> Result<CanonicalSubmission, ProviderError> {
        let mut state = self.state.lock().expect("provider mutex poisoned");
        state.requests.push(request.clone());
        if let Some((_, error)) = state
            .fail_create_for
            .iter()
            .find(|(template_id, _)| *template_id == request.template_id)
        {
            return Err(error.clone());
        }
        state.next_id += 1;
        let id = format!("sub-{}", state.next_id);
        let submitters = request
            .submitters
            .iter()
            .enumerate()
            .map(|(index, submitter)| CanonicalSubmitter {
                id: format!("{}{index}", state.next_id),
                slug: Some(format!("slug-{}-{index}", state.next_id)),
                email: submitter.email.clone(),
                name: Some(submitter.name.clone()),
                role: Some(submitter.role.clone()),
                status: Some(SubmissionStatus::Sent),
                sent_at: Some(fixed_now()),
                values: submitter.values.clone(),
                ..CanonicalSubmitter::default()
            })
            .collect();
        let submission = CanonicalSubmission {
            id: id.clone(),
            status: None,
            submitters,
            documents_url: None,
            completed_at: None,
        };
        state.submissions.insert(id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: &str) -> Result<CanonicalSubmission, ProviderError> {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .submissions
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("submission {id}")))
    }

    async fn remind_submission(
        &self,
        id: &str,
        submitter_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .reminders
            .push((id.to_string(), submitter_id.map(str::to_string)));
        Ok(())
    }

    async fn list_documents(&self, submission_id: &str) -> Result<Vec<ProviderDocument>, ProviderError> {
        Ok(self
            .state
            .lock()
            .expect("provider mutex poisoned")
            .documents
            .get(submission_id)
            .map(|documents| documents.iter().map(|(document, _)| document.clone()).collect())
            .unwrap_or_default())
    }

    async fn download_document(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.state
            .lock()
            .expect("provider mutex poisoned")
            .documents
            .values()
            .flatten()
            .find(|(document, _)| document.url == url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ProviderError::NotFound(url.to_string()))
    }
}

pub(crate) fn provider_template(id: &str, name: &str, roles: &[&str], fields: &[&str]) -> ProviderTemplate {
    ProviderTemplate {
        id: TemplateId(id.to_string()),
        name: name.to_string(),
        folder: None,
        field_names: fields.iter().map(|field| field.to_string()).collect(),
        signer_roles: roles.iter().map(|role| role.to_string()).collect(),
    }
}

pub(crate) fn local_template(id: &str, name: &str, required_for_onboarding: bool) -> DocusealTemplate {
    DocusealTemplate {
        id: TemplateId(id.to_string()),
        name: name.to_string(),
        category: None,
        field_names: vec!["First Name".to_string(), "NPI".to_string()],
        signer_roles: vec!["Employee".to_string(), "Company".to_string()],
        required_for_onboarding,
        requires_hr_signature: None,
        synced_at: None,
    }
}

pub(crate) fn pending_invitation(id: &str, template_ids: &[&str]) -> EmployeeInvitation {
    let invited_at = fixed_now();
    EmployeeInvitation {
        id: InvitationId(id.to_string()),
        token: format!("token-{id}"),
        email: "jane@x.com".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        position: Some("RN".to_string()),
        template_ids: template_ids
            .iter()
            .map(|template_id| TemplateId(template_id.to_string()))
            .collect(),
        status: InvitationStatus::Pending,
        invited_by: "hr@x.com".to_string(),
        invited_at,
        expires_at: invited_at + chrono::Duration::days(7),
        reminder_count: 0,
        last_sent_at: Some(invited_at),
        employee_id: None,
        registered_at: None,
        approved_by: None,
        approved_at: None,
        rejected_by: None,
        rejected_at: None,
        rejection_reason: None,
    }
}

pub(crate) struct Harness {
    pub(crate) orchestrator: Arc<DocumentWorkflowOrchestrator>,
    pub(crate) provider: Arc<ScriptedProvider>,
    pub(crate) gateway: Arc<MemoryGateway>,
    pub(crate) submissions: Arc<MemorySubmissions>,
    pub(crate) templates: Arc<MemoryTemplates>,
    pub(crate) invitations: Arc<MemoryInvitations>,
    pub(crate) store: Arc<LocalObjectStore>,
    pub(crate) clock: Arc<FixedClock>,
    _dir: TempDir,
}

pub(crate) struct HarnessOptions {
    pub(crate) provider: bool,
    pub(crate) hr_signer: bool,
    pub(crate) work_email: Option<&'static str>,
    pub(crate) ssn: Option<&'static str>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            provider: true,
            hr_signer: true,
            work_email: Some("jane@x.com"),
            ssn: None,
        }
    }
}

/// Orchestrator over in-memory collaborators with employee `emp-1` on file.
pub(crate) async fn harness(options: HarnessOptions) -> Harness {
    let mut employee = fields(json!({
        "firstName": "Jane",
        "lastName": "Doe",
        "npi": "1234567890",
    }));
    if let Some(email) = options.work_email {
        employee.insert("workEmail".to_string(), json!(email));
    }
    if let Some(plain) = options.ssn {
        let token = codec().encrypt(plain).expect("ssn encrypts");
        employee.insert("ssn".to_string(), json!(token));
    }
    let gateway = Arc::new(MemoryGateway::with_employee("emp-1", employee));
    let provider = Arc::new(ScriptedProvider::with_templates(vec![
        provider_template("tpl-w4", "W-4 Withholding", &["Employee"], &["First Name", "SSN"]),
        provider_template(
            "tpl-agreement",
            "Annual Compliance Agreement",
            &["Employee", "Company"],
            &["First Name", "NPI", "Sign Date"],
        ),
    ]));
    let submissions = Arc::new(MemorySubmissions::default());
    let templates = Arc::new(MemoryTemplates::default());
    let invitations = Arc::new(MemoryInvitations::default());
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(LocalObjectStore::new(dir.path()).await.expect("local store"));
    let clock = Arc::new(FixedClock::new(fixed_now()));

    let orchestrator = DocumentWorkflowOrchestrator::new(
        DocumentCollaborators {
            provider: options
                .provider
                .then(|| provider.clone() as Arc<dyn DocumentProvider>),
            employees: gateway.clone(),
            submissions: submissions.clone(),
            templates: templates.clone(),
            invitations: invitations.clone(),
            codec: codec(),
            store: store.clone(),
            clock: clock.clone(),
        },
        DocumentSettings {
            call_timeout: Duration::from_secs(5),
            submission_expiry_days: 30,
            app_url: APP_URL.to_string(),
            hr_signer: options.hr_signer.then(|| HrSigner {
                email: "hr@x.com".to_string(),
                name: "HR Department".to_string(),
            }),
        },
    );

    Harness {
        orchestrator: Arc::new(orchestrator),
        provider,
        gateway,
        submissions,
        templates,
        invitations,
        store,
        clock,
        _dir: dir,
    }
}
