use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use staffing_hr::config::AppConfig;
use staffing_hr::error::AppError;
use staffing_hr::integrations::cipher::{AesSecretCodec, SecretCodec, UnconfiguredCodec};
use staffing_hr::integrations::email::{NotificationSender, SmtpNotificationSender};
use staffing_hr::integrations::storage::{FallbackObjectStore, ObjectStore};
use staffing_hr::workflows::clock::{Clock, SystemClock};
use staffing_hr::workflows::documents::{
    DocumentCollaborators, DocumentProvider, DocumentSettings, DocumentWorkflowOrchestrator,
    DocusealClient, DocusealTemplate, FormSubmission, FormSubmissionId, FormSubmissionRepository,
    RepositoryError, TemplateId, TemplateRepository,
};
use staffing_hr::workflows::employees::{
    ChildCollection, ChildRecord, Employee, EmployeeAggregateSubmitter, EmployeeId,
    EntityPersistenceGateway, FieldMap, GatewayError, HttpEntityGateway,
};
use staffing_hr::workflows::onboarding::{
    EmployeeInvitation, InvitationId, InvitationRepository, OnboardingCollaborators,
    OnboardingLifecycleController, OnboardingSettings,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything the routers and CLI commands need, built once from config.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) employees: Arc<EmployeeAggregateSubmitter>,
    pub(crate) documents: Arc<DocumentWorkflowOrchestrator>,
    pub(crate) onboarding: Arc<OnboardingLifecycleController>,
    pub(crate) provider: Option<Arc<dyn DocumentProvider>>,
}

pub(crate) async fn build_services(config: &AppConfig) -> Result<Services, AppError> {
    let timeout = config.workflow.call_timeout;

    let codec: Arc<dyn SecretCodec> = match &config.encryption_key {
        Some(key) => Arc::new(AesSecretCodec::from_base64_key(key)?),
        None => {
            warn!("ENCRYPTION_KEY not set; sensitive fields cannot be stored or decrypted");
            Arc::new(UnconfiguredCodec)
        }
    };

    let gateway: Arc<dyn EntityPersistenceGateway> = match &config.persistence {
        Some(persistence) => Arc::new(HttpEntityGateway::new(persistence, timeout)?),
        None => {
            info!("no persistence backend configured; employees are kept in memory");
            Arc::new(InMemoryEmployeeGateway::default())
        }
    };

    let provider: Option<Arc<dyn DocumentProvider>> = match &config.docuseal {
        Some(docuseal) => match DocusealClient::from_config(docuseal, codec.as_ref(), timeout) {
            Ok(client) => Some(Arc::new(client)),
            Err(err) => {
                warn!(error = %err, "document provider configured without a usable key");
                None
            }
        },
        None => None,
    };

    let store: Arc<dyn ObjectStore> =
        Arc::new(FallbackObjectStore::from_config(&config.storage, timeout).await?);
    let notifier = config.email.clone().map(|email| {
        Arc::new(SmtpNotificationSender::new(email, timeout)) as Arc<dyn NotificationSender>
    });
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let invitations = Arc::new(InMemoryInvitationRepository::default());

    let employees = Arc::new(EmployeeAggregateSubmitter::new(
        gateway.clone(),
        codec.clone(),
        timeout,
    ));
    let documents = Arc::new(DocumentWorkflowOrchestrator::new(
        DocumentCollaborators {
            provider: provider.clone(),
            employees: gateway,
            submissions: Arc::new(InMemoryFormSubmissionRepository::default()),
            templates: Arc::new(InMemoryTemplateRepository::default()),
            invitations: invitations.clone(),
            codec,
            store,
            clock: clock.clone(),
        },
        DocumentSettings::from_config(&config.workflow, config.docuseal.as_ref()),
    ));
    let onboarding = Arc::new(OnboardingLifecycleController::new(
        OnboardingCollaborators {
            invitations,
            employees: employees.clone(),
            documents: documents.clone(),
            notifier,
            clock,
        },
        OnboardingSettings::from_config(&config.workflow),
    ));

    Ok(Services {
        employees,
        documents,
        onboarding,
        provider,
    })
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryEmployeeGateway {
    employees: Arc<Mutex<HashMap<EmployeeId, FieldMap>>>,
    children: Arc<Mutex<HashMap<String, (ChildCollection, ChildRecord)>>>,
}

fn decode_employee(id: &EmployeeId, fields: &FieldMap) -> Result<Employee, GatewayError> {
    let mut row = fields.clone();
    row.insert("id".to_string(), Value::String(id.0.clone()));
    serde_json::from_value(Value::Object(row)).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[async_trait]
impl EntityPersistenceGateway for InMemoryEmployeeGateway {
    async fn create_employee(&self, fields: FieldMap) -> Result<Employee, GatewayError> {
        let id = EmployeeId(uuid::Uuid::new_v4().to_string());
        let employee = decode_employee(&id, &fields)?;
        let mut guard = self.employees.lock().expect("employee mutex poisoned");
        guard.insert(id, fields);
        Ok(employee)
    }

    async fn update_employee(
        &self,
        id: &EmployeeId,
        fields: FieldMap,
    ) -> Result<Employee, GatewayError> {
        let mut guard = self.employees.lock().expect("employee mutex poisoned");
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("employee {id}")))?;
        let mut merged = stored.clone();
        merged.extend(fields);
        let employee = decode_employee(id, &merged)?;
        *stored = merged;
        Ok(employee)
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, GatewayError> {
        let guard = self.employees.lock().expect("employee mutex poisoned");
        guard
            .get(id)
            .map(|fields| decode_employee(id, fields))
            .transpose()
    }

    async fn create_child(
        &self,
        collection: ChildCollection,
        employee_id: &EmployeeId,
        record: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        if !self
            .employees
            .lock()
            .expect("employee mutex poisoned")
            .contains_key(employee_id)
        {
            return Err(GatewayError::NotFound(format!("employee {employee_id}")));
        }
        let child = ChildRecord {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: employee_id.clone(),
            fields: record,
        };
        let mut guard = self.children.lock().expect("child mutex poisoned");
        guard.insert(child.id.clone(), (collection, child.clone()));
        Ok(child)
    }

    async fn update_child(
        &self,
        collection: ChildCollection,
        id: &str,
        fields: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        let mut guard = self.children.lock().expect("child mutex poisoned");
        match guard.get_mut(id) {
            Some((stored, child)) if *stored == collection => {
                child.fields.extend(fields);
                Ok(child.clone())
            }
            _ => Err(GatewayError::NotFound(format!("{} {id}", collection.label()))),
        }
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryFormSubmissionRepository {
    records: Arc<Mutex<HashMap<FormSubmissionId, FormSubmission>>>,
}

impl InMemoryFormSubmissionRepository {
    fn matching(&self, keep: impl Fn(&FormSubmission) -> bool) -> Vec<FormSubmission> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut rows: Vec<FormSubmission> = guard.values().filter(|row| keep(row)).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

impl FormSubmissionRepository for InMemoryFormSubmissionRepository {
    fn insert(&self, submission: FormSubmission) -> Result<FormSubmission, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(&self, submission: FormSubmission) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&submission.id) {
            guard.insert(submission.id.clone(), submission);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &FormSubmissionId) -> Result<Option<FormSubmission>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn fetch_by_external(
        &self,
        submission_id: &str,
    ) -> Result<Option<FormSubmission>, RepositoryError> {
        Ok(self
            .matching(|row| row.submission_id == submission_id)
            .into_iter()
            .next())
    }

    fn for_employee(&self, employee_id: &EmployeeId) -> Result<Vec<FormSubmission>, RepositoryError> {
        Ok(self.matching(|row| &row.employee_id == employee_id))
    }

    fn for_invitation(
        &self,
        invitation_id: &InvitationId,
    ) -> Result<Vec<FormSubmission>, RepositoryError> {
        Ok(self.matching(|row| row.invitation_id.as_ref() == Some(invitation_id)))
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTemplateRepository {
    records: Arc<Mutex<HashMap<TemplateId, DocusealTemplate>>>,
}

impl TemplateRepository for InMemoryTemplateRepository {
    fn fetch(&self, id: &TemplateId) -> Result<Option<DocusealTemplate>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn upsert(&self, template: DocusealTemplate) -> Result<DocusealTemplate, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        guard.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn list(&self) -> Result<Vec<DocusealTemplate>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut templates: Vec<DocusealTemplate> = guard.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryInvitationRepository {
    records: Arc<Mutex<HashMap<InvitationId, EmployeeInvitation>>>,
}

impl InvitationRepository for InMemoryInvitationRepository {
    fn insert(&self, invitation: EmployeeInvitation) -> Result<EmployeeInvitation, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&invitation.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(invitation.id.clone(), invitation.clone());
        Ok(invitation)
    }

    fn update(&self, invitation: EmployeeInvitation) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&invitation.id) {
            guard.insert(invitation.id.clone(), invitation);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &InvitationId) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn fetch_by_token(&self, token: &str) -> Result<Option<EmployeeInvitation>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.values().find(|row| row.token == token).cloned())
    }

    fn list(&self) -> Result<Vec<EmployeeInvitation>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.values().cloned().collect())
    }
}
