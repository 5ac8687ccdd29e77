use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use cadence_core::orchestrator::TriggerRejection;
use cadence_core::scanner::Candidate;
use cadence_core::scheduler::{ScanTrigger, Scheduler};

use crate::daemon::cancel_on_ctrl_c;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub trigger: ScanTrigger,
    pub dispatched: usize,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub swept: u64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/scan", post(scan))
        .route("/api/plans/{id}/generate-next", post(generate_next))
        .route("/api/plans/{id}/leases", get(list_leases))
        .route("/api/leases/sweep", post(sweep))
        .layer(CorsLayer::permissive())
        .with_state(scheduler)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the scheduler loop and the HTTP surface together until Ctrl+C.
pub async fn run_serve(scheduler: Scheduler, bind: &str, port: u16) -> Result<()> {
    let scheduler = Arc::new(scheduler);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("cadence serve listening on http://{addr}");

    let app = build_router(scheduler.clone());
    let server = async {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .await;
        cancel.cancel();
        served.map_err(anyhow::Error::from)
    };
    let scheduled = async {
        let result = scheduler.run(cancel.clone()).await;
        cancel.cancel();
        result
    };

    let (scheduled, served) = tokio::join!(scheduled, server);
    scheduled?;
    served?;
    tracing::info!("cadence serve shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn scan(State(scheduler): State<Arc<Scheduler>>) -> Result<axum::response::Response, AppError> {
    let report = scheduler
        .scan_and_dispatch(ScanTrigger::Manual)
        .await
        .map_err(AppError::internal)?;

    let response = ScanResponse {
        trigger: report.trigger,
        dispatched: report.dispatch.dispatched(),
        candidates: report.candidates,
    };
    // Dropping the handle would abort the batch.
    let dispatch = report.dispatch;
    tokio::spawn(async move {
        let summary = dispatch.wait().await;
        tracing::info!(
            trigger = %ScanTrigger::Manual,
            dispatched = summary.dispatched,
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
    });

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn generate_next(
    State(scheduler): State<Arc<Scheduler>>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let triggered = scheduler.trigger_now(id).await;
    let response = triggered.response;
    // The queued run continues detached from the request.
    drop(triggered.handle);

    (trigger_status(response.rejection), Json(response)).into_response()
}

fn trigger_status(rejection: Option<TriggerRejection>) -> StatusCode {
    match rejection {
        None => StatusCode::ACCEPTED,
        Some(TriggerRejection::NotFound) => StatusCode::NOT_FOUND,
        Some(TriggerRejection::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        Some(
            TriggerRejection::Unscheduled
            | TriggerRejection::Complete
            | TriggerRejection::AlreadyGenerated
            | TriggerRejection::InProgress,
        ) => StatusCode::CONFLICT,
    }
}

async fn list_leases(
    State(scheduler): State<Arc<Scheduler>>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let leases = scheduler
        .orchestrator()
        .leases()
        .list(id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(leases).into_response())
}

async fn sweep(State(scheduler): State<Arc<Scheduler>>) -> Result<axum::response::Response, AppError> {
    let swept = scheduler.sweep_expired().await.map_err(AppError::internal)?;
    Ok(Json(SweepResponse { swept }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
