use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::domain::{new_invitation_token, EmployeeInvitation, InvitationId, InvitationStatus};
use super::repository::InvitationRepository;
use crate::config::WorkflowConfig;
use crate::error::ErrorKind;
use crate::integrations::email::{NotificationSender, OutboundEmail};
use crate::workflows::clock::Clock;
use crate::workflows::deadline::{bounded, Interruption};
use crate::workflows::documents::{
    BulkSendReport, DocumentError, DocumentWorkflowOrchestrator, RepositoryError, TemplateId,
};
use crate::workflows::employees::{
    DraftSaved, DraftSession, Employee, EmployeeAggregateSubmitter, EmployeeId, FieldMap,
    GatewayError, OnboardingStatus, SubmitError,
};

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("invitation {0} not found")]
    NotFound(String),
    #[error("invitation expired on {0}")]
    Expired(chrono::DateTime<chrono::Utc>),
    #[error("cannot {action} an invitation that is {from}")]
    InvalidTransition {
        from: InvitationStatus,
        action: &'static str,
    },
    #[error("an open invitation already exists for {0}")]
    AlreadyInvited(String),
    #[error("a rejection reason is required")]
    ReasonRequired,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("onboarding call interrupted: {0}")]
    Interrupted(#[from] Interruption),
    #[error(transparent)]
    Employee(#[from] SubmitError),
    #[error(transparent)]
    Documents(#[from] DocumentError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl OnboardingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OnboardingError::NotFound(_) => ErrorKind::NotFound,
            OnboardingError::Expired(_)
            | OnboardingError::InvalidTransition { .. }
            | OnboardingError::AlreadyInvited(_)
            | OnboardingError::ReasonRequired
            | OnboardingError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            OnboardingError::Interrupted(_) => ErrorKind::ServiceUnavailable,
            OnboardingError::Employee(err) => err.kind(),
            OnboardingError::Documents(err) => err.kind(),
            OnboardingError::Repository(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OnboardingError::NotFound(_) => "INVITATION_NOT_FOUND",
            OnboardingError::Expired(_) => "INVITATION_EXPIRED",
            OnboardingError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OnboardingError::AlreadyInvited(_) => "ALREADY_INVITED",
            OnboardingError::ReasonRequired => "REJECTION_REASON_REQUIRED",
            OnboardingError::InvalidRequest(_) => "INVALID_REQUEST",
            OnboardingError::Interrupted(Interruption::Cancelled) => "CANCELLED",
            OnboardingError::Interrupted(Interruption::TimedOut(_)) => "TIMEOUT",
            OnboardingError::Employee(err) => err.code(),
            OnboardingError::Documents(err) => err.code(),
            OnboardingError::Repository(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<GatewayError> for OnboardingError {
    fn from(value: GatewayError) -> Self {
        OnboardingError::Employee(SubmitError::Gateway(value))
    }
}

#[derive(Debug, Clone)]
pub struct OnboardingSettings {
    pub call_timeout: Duration,
    pub validity_days: i64,
    /// Page the invitation link points at; the token is appended as `?token=`.
    pub portal_url: String,
}

impl OnboardingSettings {
    pub fn from_config(workflow: &WorkflowConfig) -> Self {
        Self {
            call_timeout: workflow.call_timeout,
            validity_days: workflow.invitation_validity_days,
            portal_url: workflow.onboarding_portal_url.clone(),
        }
    }
}

pub struct OnboardingCollaborators {
    pub invitations: Arc<dyn InvitationRepository>,
    pub employees: Arc<EmployeeAggregateSubmitter>,
    pub documents: Arc<DocumentWorkflowOrchestrator>,
    /// `None` when no email transport is configured; invitations are still created.
    pub notifier: Option<Arc<dyn NotificationSender>>,
    pub clock: Arc<dyn Clock>,
}

/// HR input for a new invitation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvitation {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub template_ids: Vec<TemplateId>,
    pub invited_by: String,
}

/// Whether the invitation email went out. Creation succeeds either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Emailed { message_id: String },
    Failed { reason: String },
    NotConfigured,
}

impl NotificationOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, NotificationOutcome::Emailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationDispatch {
    pub invitation: EmployeeInvitation,
    /// Registration link, returned so HR can share it when email fails.
    pub onboarding_link: String,
    pub notification: NotificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub invitation: EmployeeInvitation,
    pub employee_id: EmployeeId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingSubmitted {
    pub invitation: EmployeeInvitation,
    pub forms: BulkSendReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub invitation: EmployeeInvitation,
    pub employee: Employee,
    pub forms_completed: bool,
}

/// Drives invitations from `pending` through registration to approval or rejection.
pub struct OnboardingLifecycleController {
    invitations: Arc<dyn InvitationRepository>,
    employees: Arc<EmployeeAggregateSubmitter>,
    documents: Arc<DocumentWorkflowOrchestrator>,
    notifier: Option<Arc<dyn NotificationSender>>,
    clock: Arc<dyn Clock>,
    settings: OnboardingSettings,
    drafts: Mutex<HashMap<InvitationId, Arc<DraftSession>>>,
}

impl OnboardingLifecycleController {
    pub fn new(collaborators: OnboardingCollaborators, settings: OnboardingSettings) -> Self {
        Self {
            invitations: collaborators.invitations,
            employees: collaborators.employees,
            documents: collaborators.documents,
            notifier: collaborators.notifier,
            clock: collaborators.clock,
            settings,
            drafts: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pending invitation and email the registration link.
    #[tracing::instrument(skip_all, fields(invited_by = %request.invited_by))]
    pub async fn invite(
        &self,
        request: NewInvitation,
        cancel: &CancellationToken,
    ) -> Result<InvitationDispatch, OnboardingError> {
        let email = request.email.trim().to_ascii_lowercase();
        if !is_plausible_email(&email) {
            return Err(OnboardingError::InvalidRequest(format!(
                "'{}' is not a valid email address",
                request.email
            )));
        }
        if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
            return Err(OnboardingError::InvalidRequest(
                "first and last name are required".to_string(),
            ));
        }

        let now = self.clock.now();
        for mut existing in self.invitations.list()? {
            if !existing.email.eq_ignore_ascii_case(&email) {
                continue;
            }
            self.apply_expiry(&mut existing, now)?;
            if existing.status.is_open() {
                return Err(OnboardingError::AlreadyInvited(email));
            }
        }

        let invitation = EmployeeInvitation {
            id: InvitationId::generate(),
            token: new_invitation_token(),
            email,
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            position: request.position.filter(|position| !position.trim().is_empty()),
            template_ids: request.template_ids,
            status: InvitationStatus::Pending,
            invited_by: request.invited_by,
            invited_at: now,
            expires_at: now + ChronoDuration::days(self.settings.validity_days),
            reminder_count: 0,
            last_sent_at: Some(now),
            employee_id: None,
            registered_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        };
        let invitation = self.invitations.insert(invitation)?;
        tracing::info!(invitation_id = %invitation.id, "invitation created");

        let notification = self.notify(&invitation, false, cancel).await;
        Ok(self.dispatch(invitation, notification))
    }

    /// Re-send the invitation email. Only pending invitations qualify, and the
    /// original validity window is kept.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn resend(
        &self,
        id: &InvitationId,
        cancel: &CancellationToken,
    ) -> Result<InvitationDispatch, OnboardingError> {
        let mut invitation = self.load(id)?;
        if invitation.status != InvitationStatus::Pending {
            return Err(OnboardingError::InvalidTransition {
                from: invitation.status,
                action: "resend",
            });
        }

        invitation.reminder_count += 1;
        invitation.last_sent_at = Some(self.clock.now());
        self.invitations.update(invitation.clone())?;

        let notification = self.notify(&invitation, true, cancel).await;
        tracing::info!(
            invitation_id = %invitation.id,
            reminders = invitation.reminder_count,
            delivered = notification.delivered(),
            "invitation resent"
        );
        Ok(self.dispatch(invitation, notification))
    }

    pub fn get(&self, id: &InvitationId) -> Result<EmployeeInvitation, OnboardingError> {
        self.load(id)
    }

    /// Every invitation, optionally narrowed to one status, with expiry applied.
    pub fn list(
        &self,
        status: Option<InvitationStatus>,
    ) -> Result<Vec<EmployeeInvitation>, OnboardingError> {
        let now = self.clock.now();
        let mut listed = Vec::new();
        for mut invitation in self.invitations.list()? {
            self.apply_expiry(&mut invitation, now)?;
            if status.is_none_or(|wanted| invitation.status == wanted) {
                listed.push(invitation);
            }
        }
        listed.sort_by(|a, b| b.invited_at.cmp(&a.invited_at));
        Ok(listed)
    }

    /// Accept the prospective employee's first draft through the invitation
    /// link, creating the employee and moving the invitation to `registered`.
    #[tracing::instrument(skip_all)]
    pub async fn register(
        &self,
        token: &str,
        fields: FieldMap,
        cancel: &CancellationToken,
    ) -> Result<Registration, OnboardingError> {
        let mut invitation = self.load_by_token(token)?;
        if invitation.status != InvitationStatus::Pending {
            return Err(OnboardingError::InvalidTransition {
                from: invitation.status,
                action: "register",
            });
        }

        let mut fields = fields;
        seed_from_invitation(&mut fields, &invitation);
        let session = self.session(&invitation);
        let saved = self
            .employees
            .save_draft(&session, fields, cancel)
            .await?;

        invitation.employee_id = Some(saved.employee_id.clone());
        invitation.registered_at = Some(self.clock.now());
        invitation.status = InvitationStatus::Registered;
        self.invitations.update(invitation.clone())?;
        tracing::info!(
            invitation_id = %invitation.id,
            employee_id = %saved.employee_id,
            "invitation registered"
        );
        Ok(Registration {
            invitation,
            employee_id: saved.employee_id,
        })
    }

    /// Save onboarding progress for a registered invitation.
    #[tracing::instrument(skip_all)]
    pub async fn save_draft(
        &self,
        token: &str,
        fields: FieldMap,
        cancel: &CancellationToken,
    ) -> Result<DraftSaved, OnboardingError> {
        let invitation = self.load_by_token(token)?;
        if invitation.status != InvitationStatus::Registered {
            return Err(OnboardingError::InvalidTransition {
                from: invitation.status,
                action: "save a draft for",
            });
        }
        let session = self.session(&invitation);
        Ok(self.employees.save_draft(&session, fields, cancel).await?)
    }

    /// Finish the employee's part: mark the record submitted and send the
    /// onboarding forms for signature.
    #[tracing::instrument(skip_all)]
    pub async fn submit(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<OnboardingSubmitted, OnboardingError> {
        let invitation = self.load_by_token(token)?;
        let employee_id = self.registered_employee(&invitation, "submit")?;

        let mut update = FieldMap::new();
        update.insert(
            "onboardingStatus".to_string(),
            Value::String(OnboardingStatus::Submitted.label().to_string()),
        );
        self.write_employee(&employee_id, update, cancel).await?;

        let forms = self
            .documents
            .send_onboarding_forms(&invitation.id, &employee_id, &invitation.invited_by, cancel)
            .await?;
        tracing::info!(
            invitation_id = %invitation.id,
            sent = forms.sent.len(),
            failed = forms.failed.len(),
            "onboarding submitted"
        );
        Ok(OnboardingSubmitted { invitation, forms })
    }

    /// Approve a registered invitation and activate the linked employee. The
    /// invitation is written first and put back to `registered` if activation fails.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn approve(
        &self,
        id: &InvitationId,
        approved_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Approval, OnboardingError> {
        let registered = self.load(id)?;
        let employee_id = self.registered_employee(&registered, "approve")?;
        let forms_completed = self.documents.are_onboarding_forms_completed(id)?;
        let now = self.clock.now();

        let mut invitation = registered.clone();
        invitation.status = InvitationStatus::Approved;
        invitation.approved_by = Some(approved_by.to_string());
        invitation.approved_at = Some(now);
        self.invitations.update(invitation.clone())?;

        let mut update = FieldMap::new();
        update.insert(
            "status".to_string(),
            Value::String("active".to_string()),
        );
        update.insert(
            "onboardingStatus".to_string(),
            Value::String(OnboardingStatus::Completed.label().to_string()),
        );
        update.insert("approvedBy".to_string(), Value::String(approved_by.to_string()));
        update.insert("approvedAt".to_string(), Value::String(now.to_rfc3339()));
        let employee = match self.write_employee(&employee_id, update, cancel).await {
            Ok(employee) => employee,
            Err(err) => {
                if let Err(revert) = self.invitations.update(registered) {
                    tracing::error!(
                        invitation_id = %id,
                        error = %revert,
                        "approved invitation could not be reverted"
                    );
                }
                return Err(err);
            }
        };
        self.forget_session(id);
        if !forms_completed {
            tracing::warn!(invitation_id = %id, "approved with onboarding forms outstanding");
        }
        tracing::info!(invitation_id = %id, employee_id = %employee_id, "invitation approved");

        Ok(Approval {
            invitation,
            employee,
            forms_completed,
        })
    }

    /// Reject a pending or registered invitation. A linked employee is left inactive.
    #[tracing::instrument(skip(self, reason, cancel))]
    pub async fn reject(
        &self,
        id: &InvitationId,
        rejected_by: &str,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<EmployeeInvitation, OnboardingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OnboardingError::ReasonRequired);
        }
        let mut invitation = self.load(id)?;
        if !invitation.status.is_open() {
            return Err(OnboardingError::InvalidTransition {
                from: invitation.status,
                action: "reject",
            });
        }

        if let Some(employee_id) = &invitation.employee_id {
            let mut update = FieldMap::new();
            update.insert(
                "status".to_string(),
                Value::String("inactive".to_string()),
            );
            self.write_employee(employee_id, update, cancel).await?;
        }

        invitation.status = InvitationStatus::Rejected;
        invitation.rejected_by = Some(rejected_by.to_string());
        invitation.rejected_at = Some(self.clock.now());
        invitation.rejection_reason = Some(reason.to_string());
        self.invitations.update(invitation.clone())?;
        self.forget_session(id);
        tracing::info!(invitation_id = %id, "invitation rejected");
        Ok(invitation)
    }

    /// Fetch by id, writing back an observed expiry.
    fn load(&self, id: &InvitationId) -> Result<EmployeeInvitation, OnboardingError> {
        let invitation = self
            .invitations
            .fetch(id)?
            .ok_or_else(|| OnboardingError::NotFound(id.to_string()))?;
        self.refresh_expiry(invitation)
    }

    /// Token lookups reject expired invitations outright.
    fn load_by_token(&self, token: &str) -> Result<EmployeeInvitation, OnboardingError> {
        let invitation = self
            .invitations
            .fetch_by_token(token.trim())?
            .ok_or_else(|| OnboardingError::NotFound("for token".to_string()))?;
        let invitation = self.refresh_expiry(invitation)?;
        if invitation.status == InvitationStatus::Expired {
            return Err(OnboardingError::Expired(invitation.expires_at));
        }
        Ok(invitation)
    }

    fn refresh_expiry(
        &self,
        mut invitation: EmployeeInvitation,
    ) -> Result<EmployeeInvitation, OnboardingError> {
        self.apply_expiry(&mut invitation, self.clock.now())?;
        Ok(invitation)
    }

    /// Write back an observed expiry and drop the draft session of an expired invitation.
    fn apply_expiry(
        &self,
        invitation: &mut EmployeeInvitation,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), OnboardingError> {
        if invitation.observe_expiry(now) {
            tracing::info!(invitation_id = %invitation.id, "invitation expired");
            self.invitations.update(invitation.clone())?;
        }
        if invitation.status == InvitationStatus::Expired {
            self.forget_session(&invitation.id);
        }
        Ok(())
    }

    fn registered_employee(
        &self,
        invitation: &EmployeeInvitation,
        action: &'static str,
    ) -> Result<EmployeeId, OnboardingError> {
        match (&invitation.status, &invitation.employee_id) {
            (InvitationStatus::Registered, Some(employee_id)) => Ok(employee_id.clone()),
            (InvitationStatus::Registered, None) => Err(OnboardingError::InvalidRequest(format!(
                "invitation {} has no linked employee",
                invitation.id
            ))),
            (status, _) => Err(OnboardingError::InvalidTransition {
                from: *status,
                action,
            }),
        }
    }

    fn session(&self, invitation: &EmployeeInvitation) -> Arc<DraftSession> {
        let mut drafts = match self.drafts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drafts
            .entry(invitation.id.clone())
            .or_insert_with(|| {
                Arc::new(match &invitation.employee_id {
                    Some(employee_id) => DraftSession::resume(employee_id.clone()),
                    None => DraftSession::new(),
                })
            })
            .clone()
    }

    fn forget_session(&self, id: &InvitationId) {
        if let Ok(mut drafts) = self.drafts.lock() {
            drafts.remove(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn open_drafts(&self) -> usize {
        self.drafts.lock().map(|drafts| drafts.len()).unwrap_or_default()
    }

    async fn write_employee(
        &self,
        employee_id: &EmployeeId,
        fields: FieldMap,
        cancel: &CancellationToken,
    ) -> Result<Employee, OnboardingError> {
        let employee = bounded(
            cancel,
            self.settings.call_timeout,
            self.employees.gateway().update_employee(employee_id, fields),
        )
        .await??;
        Ok(employee)
    }

    fn onboarding_link(&self, invitation: &EmployeeInvitation) -> String {
        let separator = if self.settings.portal_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={}", self.settings.portal_url, invitation.token)
    }

    async fn notify(
        &self,
        invitation: &EmployeeInvitation,
        reminder: bool,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        let Some(notifier) = &self.notifier else {
            tracing::warn!(invitation_id = %invitation.id, "email not configured; invitation not sent");
            return NotificationOutcome::NotConfigured;
        };
        let email = render_invitation(invitation, &self.onboarding_link(invitation), reminder);
        match bounded(cancel, self.settings.call_timeout, notifier.send(&email)).await {
            Ok(Ok(receipt)) => NotificationOutcome::Emailed {
                message_id: receipt.message_id,
            },
            Ok(Err(err)) => {
                tracing::warn!(invitation_id = %invitation.id, error = %err, "invitation email failed");
                NotificationOutcome::Failed {
                    reason: err.to_string(),
                }
            }
            Err(interruption) => {
                tracing::warn!(invitation_id = %invitation.id, error = %interruption, "invitation email interrupted");
                NotificationOutcome::Failed {
                    reason: interruption.to_string(),
                }
            }
        }
    }

    fn dispatch(
        &self,
        invitation: EmployeeInvitation,
        notification: NotificationOutcome,
    ) -> InvitationDispatch {
        InvitationDispatch {
            onboarding_link: self.onboarding_link(&invitation),
            invitation,
            notification,
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Fill identity fields HR already entered unless the applicant supplied them.
fn seed_from_invitation(fields: &mut FieldMap, invitation: &EmployeeInvitation) {
    let seeds = [
        ("firstName", Some(invitation.first_name.as_str())),
        ("lastName", Some(invitation.last_name.as_str())),
        ("workEmail", Some(invitation.email.as_str())),
        ("jobTitle", invitation.position.as_deref()),
    ];
    for (field, value) in seeds {
        let Some(value) = value else { continue };
        let missing = match fields.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(existing)) => existing.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            fields.insert(field.to_string(), Value::String(value.to_string()));
        }
    }
}

fn render_invitation(invitation: &EmployeeInvitation, link: &str, reminder: bool) -> OutboundEmail {
    let subject = if reminder {
        "Reminder: complete your onboarding".to_string()
    } else {
        "You're invited to complete your onboarding".to_string()
    };
    let expires = invitation.expires_at.format("%B %-d, %Y");
    let greeting = match invitation.first_name.trim() {
        "" => "Hello".to_string(),
        name => format!("Hello {name}"),
    };
    let role = invitation
        .position
        .as_deref()
        .map(|position| format!(" as {position}"))
        .unwrap_or_default();
    OutboundEmail {
        to: invitation.email.clone(),
        subject,
        body_text: format!(
            "{greeting},\n\nYou have been invited to join the team{role}. \
             Complete your onboarding here:\n{link}\n\nThis link expires on {expires}.\n"
        ),
        body_html: format!(
            "<p>{greeting},</p><p>You have been invited to join the team{role}.</p>\
             <p><a href=\"{link}\">Complete your onboarding</a></p>\
             <p>This link expires on {expires}.</p>"
        ),
        reply_to: Some(invitation.invited_by.clone()).filter(|sender| sender.contains('@')),
    }
}
