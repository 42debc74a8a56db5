use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::domain::{ChildCollection, EmployeeId, FieldMap};
use super::gateway::GatewayError;
use super::submitter::{ChildBatch, EmployeeAggregateSubmitter, SubmitError};
use crate::error::error_response;

#[derive(Clone)]
pub(crate) struct EmployeeRouterState {
    submitter: Arc<EmployeeAggregateSubmitter>,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateEmployeeRequest {
    employee: FieldMap,
    #[serde(default)]
    children: ChildBatch,
}

/// Routes for HR-side employee record maintenance.
pub fn employee_router(
    submitter: Arc<EmployeeAggregateSubmitter>,
    shutdown: CancellationToken,
) -> Router {
    Router::new()
        .route("/api/v1/employees", post(create_handler))
        .route(
            "/api/v1/employees/:employee_id",
            get(get_handler).patch(update_handler),
        )
        .route(
            "/api/v1/employees/:employee_id/children/:collection",
            post(add_child_handler),
        )
        .route(
            "/api/v1/employees/:employee_id/children/:collection/:child_id",
            patch(update_child_handler),
        )
        .with_state(EmployeeRouterState {
            submitter,
            shutdown,
        })
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let details = match &self {
            SubmitError::PartialFailure {
                employee,
                created,
                failures,
            } => Some(json!({
                "employee": employee,
                "created": created,
                "failures": failures,
            })),
            SubmitError::Gateway(GatewayError::Validation { fields }) => {
                Some(json!({ "fields": fields }))
            }
            _ => None,
        };
        error_response(self.kind(), self.code(), self.to_string(), details)
    }
}

pub(crate) async fn create_handler(
    State(state): State<EmployeeRouterState>,
    Json(request): Json<CreateEmployeeRequest>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .submitter
        .create_with_children(request.employee, &request.children, &cancel)
        .await
    {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn get_handler(
    State(state): State<EmployeeRouterState>,
    Path(employee_id): Path<String>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state.submitter.get(&EmployeeId(employee_id), &cancel).await {
        Ok(employee) => (StatusCode::OK, Json(employee)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn update_handler(
    State(state): State<EmployeeRouterState>,
    Path(employee_id): Path<String>,
    Json(fields): Json<FieldMap>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .submitter
        .update_scalar_fields(&EmployeeId(employee_id), fields, &cancel)
        .await
    {
        Ok(update) => (StatusCode::OK, Json(update)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn add_child_handler(
    State(state): State<EmployeeRouterState>,
    Path((employee_id, collection)): Path<(String, ChildCollection)>,
    Json(item): Json<FieldMap>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .submitter
        .add_child(&EmployeeId(employee_id), collection, &item, &cancel)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn update_child_handler(
    State(state): State<EmployeeRouterState>,
    Path((_employee_id, collection, child_id)): Path<(String, ChildCollection, String)>,
    Json(item): Json<FieldMap>,
) -> Response {
    let cancel = state.shutdown.child_token();
    match state
        .submitter
        .update_child(collection, &child_id, &item, &cancel)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => err.into_response(),
    }
}
