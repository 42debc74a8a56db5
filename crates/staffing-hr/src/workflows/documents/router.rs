use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::domain::{TemplateId, TemplateSettings};
use super::orchestrator::{DocumentError, DocumentWorkflowOrchestrator, SendForm};
use crate::error::{error_response, ErrorKind};
use crate::workflows::employees::{EmployeeId, GatewayError};
use crate::workflows::onboarding::InvitationId;

const DEFAULT_LINK_TTL_SECS: u64 = 900;

#[derive(Clone)]
pub(crate) struct DocumentRouterState {
    orchestrator: Arc<DocumentWorkflowOrchestrator>,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendFormRequest {
    employee_id: String,
    template_id: String,
    created_by: String,
    #[serde(default)]
    is_onboarding: bool,
    #[serde(default)]
    invitation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OnboardingSendRequest {
    employee_id: String,
    created_by: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReminderRequest {
    #[serde(default)]
    signer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionQuery {
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    invitation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LinkQuery {
    #[serde(default)]
    ttl_secs: Option<u64>,
}

/// Routes for templates, signature submissions, and onboarding form dispatch.
pub fn document_router(
    orchestrator: Arc<DocumentWorkflowOrchestrator>,
    shutdown: CancellationToken,
) -> Router {
    Router::new()
        .route("/api/v1/documents/templates", get(list_templates_handler))
        .route("/api/v1/documents/templates/sync", post(sync_templates_handler))
        .route(
            "/api/v1/documents/templates/:template_id",
            patch(template_settings_handler),
        )
        .route(
            "/api/v1/documents/submissions",
            get(list_submissions_handler).post(send_handler),
        )
        .route("/api/v1/documents/submissions/:id", get(submission_handler))
        .route(
            "/api/v1/documents/submissions/:id/refresh",
            post(refresh_handler),
        )
        .route("/api/v1/documents/submissions/:id/remind", post(remind_handler))
        .route(
            "/api/v1/documents/submissions/:id/archive",
            post(archive_handler),
        )
        .route(
            "/api/v1/documents/submissions/:id/documents/:name/link",
            get(link_handler),
        )
        .route(
            "/api/v1/documents/onboarding/:invitation_id/send",
            post(onboarding_send_handler),
        )
        .route(
            "/api/v1/documents/onboarding/:invitation_id/completion",
            get(completion_handler),
        )
        .with_state(DocumentRouterState {
            orchestrator,
            shutdown,
        })
}

impl IntoResponse for DocumentError {
    fn into_response(self) -> Response {
        let details = match &self {
            DocumentError::Persistence(GatewayError::Validation { fields }) => {
                Some(json!({ "fields": fields }))
            }
            _ => None,
        };
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "document workflow failed");
        }
        error_response(self.kind(), self.code(), self.to_string(), details)
    }
}

pub(crate) async fn list_templates_handler(State(state): State<DocumentRouterState>) -> Response {
    match state.orchestrator.list_templates() {
        Ok(templates) => (StatusCode::OK, Json(templates)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn sync_templates_handler(State(state): State<DocumentRouterState>) -> Response {
    let cancel = state.shutdown.child_token();
    match state.orchestrator.sync_templates(&cancel).await {
        Ok(templates) => (StatusCode::OK, Json(templates)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn template_settings_handler(
    State(state): State<DocumentRouterState>,
    Path(template_id): Path<String>,
    Json(settings): Json<TemplateSettings>,
) -> Response {
    match state
        .orchestrator
        .update_template_settings(&TemplateId(template_id), settings)
    {
        Ok(template) => (StatusCode::OK, Json(template)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn send_handler(
    State(state): State<DocumentRouterState>,
    Json(request): Json<SendFormRequest>,
) -> Response {
    let cancel = state.shutdown.child_token();
    let send = SendForm {
        employee_id: EmployeeId(request.employee_id),
        template_id: TemplateId(request.template_id),
        created_by: request.created_by,
        is_onboarding: request.is_onboarding,
        invitation_id: request.invitation_id.map(InvitationId),
    };
    match state.orchestrator.send_form_to_employee(send, &cancel).await {
        Ok(submission) => (StatusCode::CREATED, Json(submission)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_submissions_handler(
    State(state): State<DocumentRouterState>,
    Query(query): Query<SubmissionQuery>,
) -> Response {
    let listed = match (query.employee_id, query.invitation_id) {
        (_, Some(invitation_id)) => state
            .orchestrator
            .submissions_for_invitation(&InvitationId(invitation_id)),
        (Some(employee_id), None) => state
            .orchestrator
            .submissions_for_employee(&EmployeeId(employee_id)),
        (None, None) => Err(DocumentError::InvalidRequest(
            "employeeId or invitationId is required".to_string(),
        )),
    };
    match listed {
        Ok(submissions) => (StatusCode::OK, Json(submissions)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn submission_handler(
    State(state): State<DocumentRouterState>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.submission(&id) {
        Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Polls the provider. A submission unknown locally answers `null` with 200.
pub(crate) async fn refresh_handler(
    State(state): State<DocumentRouterState>,
    Path(id): Path<String>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.orchestrator.update_submission_status(&id, &cancel).await {
        Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn remind_handler(
    State(state): State<DocumentRouterState>,
    Path(id): Path<String>,
    body: Option<Json<ReminderRequest>>,
) -> Response {
    let cancel = state.shutdown.child_token();
    let request = body.map(|Json(request)| request).unwrap_or_default();
    match state
        .orchestrator
        .send_reminder(&id, request.signer_email.as_deref(), &cancel)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn archive_handler(
    State(state): State<DocumentRouterState>,
    Path(id): Path<String>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.orchestrator.archive_documents(&id, &cancel).await {
        Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn link_handler(
    State(state): State<DocumentRouterState>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<LinkQuery>,
) -> Response {
    let cancel = state.shutdown.child_token();
    let ttl = Duration::from_secs(query.ttl_secs.unwrap_or(DEFAULT_LINK_TTL_SECS));
    match state
        .orchestrator
        .signed_document_url(&id, &name, ttl, &cancel)
        .await
    {
        Ok(url) => (StatusCode::OK, Json(json!({ "url": url }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn onboarding_send_handler(
    State(state): State<DocumentRouterState>,
    Path(invitation_id): Path<String>,
    Json(request): Json<OnboardingSendRequest>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .orchestrator
        .send_onboarding_forms(
            &InvitationId(invitation_id),
            &EmployeeId(request.employee_id),
            &request.created_by,
            &cancel,
        )
        .await
    {
        Ok(report) if report.failed.is_empty() => (StatusCode::OK, Json(report)).into_response(),
        Ok(report) => (StatusCode::MULTI_STATUS, Json(report)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn completion_handler(
    State(state): State<DocumentRouterState>,
    Path(invitation_id): Path<String>,
) -> Response {
    match state
        .orchestrator
        .are_onboarding_forms_completed(&InvitationId(invitation_id))
    {
        Ok(completed) => (StatusCode::OK, Json(json!({ "completed": completed }))).into_response(),
        Err(err) => err.into_response(),
    }
}
