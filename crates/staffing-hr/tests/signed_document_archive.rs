use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use staffing_hr::integrations::cipher::UnconfiguredCodec;
use staffing_hr::integrations::storage::{LocalObjectStore, ObjectStore};
use staffing_hr::workflows::clock::FixedClock;
use staffing_hr::workflows::documents::{
    CanonicalSubmission, CanonicalSubmitter, DocumentCollaborators, DocumentProvider,
    DocumentSettings, DocumentWorkflowOrchestrator, DocusealTemplate, FormSubmission,
    FormSubmissionId, FormSubmissionRepository, ProviderDocument, ProviderError,
    ProviderTemplate, RepositoryError, SendForm, SubmissionRequest, SubmissionStatus, TemplateId,
    TemplateRepository,
};
use staffing_hr::workflows::employees::{
    ChildCollection, ChildRecord, Employee, EmployeeId, EntityPersistenceGateway, FieldMap,
    GatewayError,
};
use staffing_hr::workflows::onboarding::{EmployeeInvitation, InvitationId, InvitationRepository};
use tokio_util::sync::CancellationToken;

const SIGNED_PDF: &[u8] = b"%PDF-1.7 signed withholding certificate";

/// Provider that opens submission "900" and lets the test decide its state.
#[derive(Default)]
struct ScriptedProvider {
    current: Mutex<Option<CanonicalSubmission>>,
}

impl ScriptedProvider {
    fn employee_signs(&self) {
        let mut guard = self.current.lock().expect("provider mutex poisoned");
        if let Some(submission) = guard.as_mut() {
            submission.status = Some(SubmissionStatus::Completed);
            submission.completed_at = Some(Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap());
            for submitter in &mut submission.submitters {
                submitter.status = Some(SubmissionStatus::Completed);
            }
        }
    }
}

#[async_trait]
impl DocumentProvider for ScriptedProvider {
    async fn list_templates(&self) -> Result<Vec<ProviderTemplate>, ProviderError> {
        Ok(vec![ProviderTemplate {
            id: TemplateId("tpl-w4".to_string()),
            name: "W-4 Withholding".to_string(),
            folder: Some("tax".to_string()),
            field_names: vec!["First Name".to_string(), "Last Name".to_string()],
            signer_roles: vec!["Employee".to_string()],
        }])
    }

    async fn create_submission(
        &self,
        request: &SubmissionRequest,
    ) -> Result<CanonicalSubmission, ProviderError> {
        let submitters = request
            .submitters
            .iter()
            .enumerate()
            .map(|(index, submitter)| CanonicalSubmitter {
                id: format!("90{index}"),
                slug: Some(format!("slug-{index}")),
                email: submitter.email.clone(),
                name: Some(submitter.name.clone()),
                role: Some(submitter.role.clone()),
                status: Some(SubmissionStatus::Sent),
                values: submitter.values.clone(),
                ..CanonicalSubmitter::default()
            })
            .collect();
        let submission = CanonicalSubmission {
            id: "900".to_string(),
            status: Some(SubmissionStatus::Sent),
            submitters,
            ..CanonicalSubmission::default()
        };
        *self.current.lock().expect("provider mutex poisoned") = Some(submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: &str) -> Result<CanonicalSubmission, ProviderError> {
        self.current
            .lock()
            .expect("provider mutex poisoned")
            .clone()
            .filter(|submission| submission.id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("submission {id}")))
    }

    async fn remind_submission(
        &self,
        _id: &str,
        _submitter_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_documents(
        &self,
        _submission_id: &str,
    ) -> Result<Vec<ProviderDocument>, ProviderError> {
        Ok(vec![ProviderDocument {
            name: "W-4 Withholding".to_string(),
            url: "https://sign.example.com/files/900.pdf".to_string(),
        }])
    }

    async fn download_document(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(SIGNED_PDF.to_vec())
    }
}

struct OneEmployee {
    employee: Employee,
}

#[async_trait]
impl EntityPersistenceGateway for OneEmployee {
    async fn create_employee(&self, _fields: FieldMap) -> Result<Employee, GatewayError> {
        Err(GatewayError::Unavailable("read only".to_string()))
    }

    async fn update_employee(
        &self,
        id: &EmployeeId,
        _fields: FieldMap,
    ) -> Result<Employee, GatewayError> {
        Err(GatewayError::NotFound(format!("employee {id}")))
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, GatewayError> {
        Ok((id == &self.employee.id).then(|| self.employee.clone()))
    }

    async fn create_child(
        &self,
        collection: ChildCollection,
        _employee_id: &EmployeeId,
        _record: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        Err(GatewayError::Unavailable(collection.to_string()))
    }

    async fn update_child(
        &self,
        collection: ChildCollection,
        _id: &str,
        _fields: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        Err(GatewayError::Unavailable(collection.to_string()))
    }
}

#[derive(Default)]
struct Tables {
    submissions: Mutex<HashMap<FormSubmissionId, FormSubmission>>,
    templates: Mutex<HashMap<TemplateId, DocusealTemplate>>,
}

impl FormSubmissionRepository for Tables {
    fn insert(&self, submission: FormSubmission) -> Result<FormSubmission, RepositoryError> {
        let mut guard = self.submissions.lock().expect("table mutex poisoned");
        guard.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(&self, submission: FormSubmission) -> Result<(), RepositoryError> {
        let mut guard = self.submissions.lock().expect("table mutex poisoned");
        match guard.get_mut(&submission.id) {
            Some(stored) => {
                *stored = submission;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &FormSubmissionId) -> Result<Option<FormSubmission>, RepositoryError> {
        Ok(self.submissions.lock().expect("table mutex poisoned").get(id).cloned())
    }

    fn fetch_by_external(
        &self,
        submission_id: &str,
    ) -> Result<Option<FormSubmission>, RepositoryError> {
        let guard = self.submissions.lock().expect("table mutex poisoned");
        Ok(guard
            .values()
            .find(|row| row.submission_id == submission_id)
            .cloned())
    }

    fn for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<FormSubmission>, RepositoryError> {
        let guard = self.submissions.lock().expect("table mutex poisoned");
        Ok(guard
            .values()
            .filter(|row| &row.employee_id == employee_id)
            .cloned()
            .collect())
    }

    fn for_invitation(
        &self,
        invitation_id: &InvitationId,
    ) -> Result<Vec<FormSubmission>, RepositoryError> {
        let guard = self.submissions.lock().expect("table mutex poisoned");
        Ok(guard
            .values()
            .filter(|row| row.invitation_id.as_ref() == Some(invitation_id))
            .cloned()
            .collect())
    }
}

impl TemplateRepository for Tables {
    fn fetch(&self, id: &TemplateId) -> Result<Option<DocusealTemplate>, RepositoryError> {
        Ok(self.templates.lock().expect("table mutex poisoned").get(id).cloned())
    }

    fn upsert(&self, template: DocusealTemplate) -> Result<DocusealTemplate, RepositoryError> {
        let mut guard = self.templates.lock().expect("table mutex poisoned");
        guard.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn list(&self) -> Result<Vec<DocusealTemplate>, RepositoryError> {
        Ok(self
            .templates
            .lock()
            .expect("table mutex poisoned")
            .values()
            .cloned()
            .collect())
    }
}

struct NoInvitations;

impl InvitationRepository for NoInvitations {
    fn insert(&self, invitation: EmployeeInvitation) -> Result<EmployeeInvitation, RepositoryError> {
        Ok(invitation)
    }

    fn update(&self, _invitation: EmployeeInvitation) -> Result<(), RepositoryError> {
        Err(RepositoryError::NotFound)
    }

    fn fetch(&self, _id: &InvitationId) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        Ok(None)
    }

    fn fetch_by_token(&self, _token: &str) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        Ok(None)
    }

    fn list(&self) -> Result<Vec<EmployeeInvitation>, RepositoryError> {
        Ok(Vec::new())
    }
}

fn jane() -> Employee {
    let row: Value = json!({
        "id": "emp-7",
        "firstName": "Jane",
        "lastName": "Doe",
        "workEmail": "jane.doe@x.com",
        "status": "active"
    });
    serde_json::from_value(row).expect("employee row decodes")
}

struct Fixture {
    orchestrator: DocumentWorkflowOrchestrator,
    provider: Arc<ScriptedProvider>,
    store: Arc<LocalObjectStore>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(LocalObjectStore::new(dir.path()).await.expect("local store"));
    let provider = Arc::new(ScriptedProvider::default());
    let tables = Arc::new(Tables::default());
    let orchestrator = DocumentWorkflowOrchestrator::new(
        DocumentCollaborators {
            provider: Some(provider.clone()),
            employees: Arc::new(OneEmployee { employee: jane() }),
            submissions: tables.clone(),
            templates: tables,
            invitations: Arc::new(NoInvitations),
            codec: Arc::new(UnconfiguredCodec),
            store: store.clone(),
            clock: Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
            )),
        },
        DocumentSettings {
            call_timeout: Duration::from_secs(5),
            submission_expiry_days: 30,
            app_url: "https://sign.example.com".to_string(),
            hr_signer: None,
        },
    );
    Fixture {
        orchestrator,
        provider,
        store,
        _dir: dir,
    }
}

#[tokio::test]
async fn completed_form_lands_in_local_archive() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    f.orchestrator.sync_templates(&cancel).await.expect("sync");

    let sent = f
        .orchestrator
        .send_form_to_employee(
            SendForm {
                employee_id: EmployeeId("emp-7".to_string()),
                template_id: TemplateId("tpl-w4".to_string()),
                created_by: "hr@x.com".to_string(),
                is_onboarding: false,
                invitation_id: None,
            },
            &cancel,
        )
        .await
        .expect("form sent");
    assert_eq!(sent.status, SubmissionStatus::Sent);
    assert_eq!(
        sent.submission_data.employee_signing_url.as_deref(),
        Some("https://sign.example.com/s/slug-0")
    );

    let early = f
        .orchestrator
        .archive_documents("900", &cancel)
        .await
        .expect_err("unsigned forms are not archived");
    assert_eq!(early.code(), "INVALID_REQUEST");

    f.provider.employee_signs();
    let refreshed = f
        .orchestrator
        .update_submission_status("900", &cancel)
        .await
        .expect("refresh")
        .expect("record known");
    assert_eq!(refreshed.status, SubmissionStatus::Completed);
    assert!(refreshed.submission_data.employee_signed);

    let archived = f
        .orchestrator
        .archive_documents(&sent.id.0, &cancel)
        .await
        .expect("archive");
    assert_eq!(archived.archived_documents.len(), 1);
    let key = &archived.archived_documents[0].key;
    assert_eq!(key, "employees/emp-7/forms/900/W-4_Withholding.pdf");

    let bytes = f.store.get(key).await.expect("object stored");
    assert_eq!(bytes, SIGNED_PDF);

    let link = f
        .orchestrator
        .signed_document_url("900", "W-4 Withholding", Duration::from_secs(300), &cancel)
        .await
        .expect("signed link");
    assert!(link.starts_with("file://"));
}

#[tokio::test]
async fn archiving_twice_replaces_the_entry() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    f.orchestrator.sync_templates(&cancel).await.expect("sync");
    f.orchestrator
        .send_form_to_employee(
            SendForm {
                employee_id: EmployeeId("emp-7".to_string()),
                template_id: TemplateId("tpl-w4".to_string()),
                created_by: "hr@x.com".to_string(),
                is_onboarding: false,
                invitation_id: None,
            },
            &cancel,
        )
        .await
        .expect("form sent");
    f.provider.employee_signs();
    f.orchestrator
        .update_submission_status("900", &cancel)
        .await
        .expect("refresh");

    f.orchestrator
        .archive_documents("900", &cancel)
        .await
        .expect("first archive");
    let again = f
        .orchestrator
        .archive_documents("900", &cancel)
        .await
        .expect("second archive");

    assert_eq!(again.archived_documents.len(), 1);
    let listed = f.store.list("employees/emp-7/").await.expect("list");
    assert_eq!(listed.len(), 1);
}
