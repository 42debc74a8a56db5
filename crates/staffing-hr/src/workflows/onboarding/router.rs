use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::controller::{NewInvitation, OnboardingError, OnboardingLifecycleController};
use super::domain::{InvitationId, InvitationStatus};
use crate::error::{error_response, ErrorKind};
use crate::workflows::employees::FieldMap;

#[derive(Clone)]
pub(crate) struct OnboardingRouterState {
    controller: Arc<OnboardingLifecycleController>,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    status: Option<InvitationStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApproveRequest {
    approved_by: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RejectRequest {
    rejected_by: String,
    #[serde(default)]
    reason: String,
}

/// HR-facing invitation routes plus the token-addressed routes the applicant uses.
pub fn onboarding_router(
    controller: Arc<OnboardingLifecycleController>,
    shutdown: CancellationToken,
) -> Router {
    Router::new()
        .route(
            "/api/v1/onboarding/invitations",
            get(list_handler).post(invite_handler),
        )
        .route("/api/v1/onboarding/invitations/:id", get(get_handler))
        .route(
            "/api/v1/onboarding/invitations/:id/resend",
            post(resend_handler),
        )
        .route(
            "/api/v1/onboarding/invitations/:id/approve",
            post(approve_handler),
        )
        .route(
            "/api/v1/onboarding/invitations/:id/reject",
            post(reject_handler),
        )
        .route("/api/v1/onboarding/register/:token", post(register_handler))
        .route(
            "/api/v1/onboarding/register/:token/draft",
            post(draft_handler).put(draft_handler),
        )
        .route(
            "/api/v1/onboarding/register/:token/submit",
            post(submit_handler),
        )
        .with_state(OnboardingRouterState {
            controller,
            shutdown,
        })
}

impl IntoResponse for OnboardingError {
    fn into_response(self) -> Response {
        match self {
            OnboardingError::Employee(err) => err.into_response(),
            OnboardingError::Documents(err) => err.into_response(),
            other => {
                if other.kind() == ErrorKind::Internal {
                    tracing::error!(error = %other, "onboarding workflow failed");
                }
                let details = match &other {
                    OnboardingError::InvalidTransition { from, .. } => {
                        Some(json!({ "status": from }))
                    }
                    _ => None,
                };
                error_response(other.kind(), other.code(), other.to_string(), details)
            }
        }
    }
}

pub(crate) async fn invite_handler(
    State(state): State<OnboardingRouterState>,
    Json(request): Json<NewInvitation>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.controller.invite(request, &cancel).await {
        Ok(dispatch) => (StatusCode::CREATED, Json(dispatch)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_handler(
    State(state): State<OnboardingRouterState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.controller.list(query.status) {
        Ok(invitations) => (StatusCode::OK, Json(invitations)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn get_handler(
    State(state): State<OnboardingRouterState>,
    Path(id): Path<String>,
) -> Response {
    match state.controller.get(&InvitationId(id)) {
        Ok(invitation) => (StatusCode::OK, Json(invitation)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn resend_handler(
    State(state): State<OnboardingRouterState>,
    Path(id): Path<String>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.controller.resend(&InvitationId(id), &cancel).await {
        Ok(dispatch) => (StatusCode::OK, Json(dispatch)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn approve_handler(
    State(state): State<OnboardingRouterState>,
    Path(id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .controller
        .approve(&InvitationId(id), &request.approved_by, &cancel)
        .await
    {
        Ok(approval) => (StatusCode::OK, Json(approval)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn reject_handler(
    State(state): State<OnboardingRouterState>,
    Path(id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .controller
        .reject(
            &InvitationId(id),
            &request.rejected_by,
            &request.reason,
            &cancel,
        )
        .await
    {
        Ok(invitation) => (StatusCode::OK, Json(invitation)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn register_handler(
    State(state): State<OnboardingRouterState>,
    Path(token): Path<String>,
    Json(fields): Json<FieldMap>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.controller.register(&token, fields, &cancel).await {
        Ok(registration) => (StatusCode::CREATED, Json(registration)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn draft_handler(
    State(state): State<OnboardingRouterState>,
    Path(token): Path<String>,
    Json(fields): Json<FieldMap>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.controller.save_draft(&token, fields, &cancel).await {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn submit_handler(
    State(state): State<OnboardingRouterState>,
    Path(token): Path<String>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.controller.submit(&token, &cancel).await {
        Ok(submitted) if submitted.forms.failed.is_empty() => {
            (StatusCode::OK, Json(submitted)).into_response()
        }
        Ok(submitted) => (StatusCode::MULTI_STATUS, Json(submitted)).into_response(),
        Err(err) => err.into_response(),
    }
}
