use crate::cli::ServeArgs;
use crate::infra::{build_services, AppState};
use crate::routes::app_router;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use staffing_hr::config::AppConfig;
use staffing_hr::error::AppError;
use staffing_hr::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let services = build_services(&config).await?;
    let shutdown = CancellationToken::new();

    let app = app_router(&services, shutdown.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "staffing hr service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown, readiness_flag))
        .await?;
    info!("staffing hr service stopped");
    Ok(())
}

/// Resolves on Ctrl-C. Flips readiness off and cancels every in-flight
/// workflow call before axum drains connections.
async fn wait_for_shutdown(shutdown: CancellationToken, readiness: Arc<AtomicBool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    readiness.store(false, Ordering::Release);
    shutdown.cancel();
}
