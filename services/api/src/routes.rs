use crate::infra::{AppState, Services};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use staffing_hr::workflows::documents::document_router;
use staffing_hr::workflows::employees::employee_router;
use staffing_hr::workflows::onboarding::onboarding_router;
use tokio_util::sync::CancellationToken;

/// Every workflow router plus the operational endpoints. Handlers derive
/// their per-request tokens from `shutdown`.
pub(crate) fn app_router(services: &Services, shutdown: CancellationToken) -> Router {
    employee_router(services.employees.clone(), shutdown.clone())
        .merge(document_router(services.documents.clone(), shutdown.clone()))
        .merge(onboarding_router(services.onboarding.clone(), shutdown))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
