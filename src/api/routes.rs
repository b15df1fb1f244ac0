//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::budget::{CalibrationResult, CalibrationStats, RateCatalog, RateTable, RateTableSpec};
use crate::config::Config;
use crate::economist::Economist;
use crate::error::EconomistError;
use crate::request::RequestPayload;
use crate::trace::EconomicTrace;
use crate::voc::VocResult;

use super::trace_store::{InMemoryTraceStore, TraceStore};
use super::types::*;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// How often expired traces are purged.
const TRACE_PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Shared application state.
pub struct AppState {
    pub economist: Economist,
    /// Issued traces awaiting reconciliation
    pub traces: Arc<dyn TraceStore>,
}

impl AppState {
    pub fn new(economist: Economist, traces: Arc<dyn TraceStore>) -> Self {
        Self { economist, traces }
    }
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let catalog = RateCatalog::new(config.load_rate_table()?);
    let economist = Economist::from_config(&config, catalog)?;
    let traces: Arc<dyn TraceStore> = Arc::new(InMemoryTraceStore::with_limits(
        config.trace_capacity,
        Some(config.trace_ttl_hours),
    ));
    let state = Arc::new(AppState::new(economist, Arc::clone(&traces)));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TRACE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match traces.purge().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired traces"),
                Err(e) => tracing::warn!("Failed to purge traces: {}", e),
            }
        }
    });

    let app = router(state).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Build the API router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/economist/check", post(check_execution))
        .route("/api/economist/voc", post(should_continue))
        .route("/api/economist/traces/:id", get(get_trace).delete(delete_trace))
        .route("/api/economist/traces/:id/reconcile", post(reconcile_trace))
        .route("/api/economist/rates", get(get_rates).put(put_rates))
        .route("/api/economist/calibration", get(get_calibration))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn error_response(err: EconomistError) -> (StatusCode, String) {
    let status = match &err {
        EconomistError::UnknownModel(_) => StatusCode::NOT_FOUND,
        EconomistError::Validation(_) => StatusCode::BAD_REQUEST,
        EconomistError::AlreadyReconciled(_) => StatusCode::CONFLICT,
    };
    (status, err.to_string())
}

fn join_error(e: tokio::task::JoinError) -> (StatusCode, String) {
    tracing::error!("Economist task failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn store_error(e: String) -> (StatusCode, String) {
    tracing::error!("Trace store error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e)
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        models: state.economist.catalog().snapshot().len(),
        traces: state.traces.count().await,
        persistent_traces: state.traces.is_persistent(),
    })
}

/// Price and authorize a request. The trace is stored for later reconciliation.
///
/// Pricing and the alternative search run on the blocking pool.
async fn check_execution(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RequestPayload>,
) -> ApiResult<EconomicTrace> {
    let economist_state = Arc::clone(&state);
    let trace = tokio::task::spawn_blocking(move || economist_state.economist.check_execution(&request))
        .await
        .map_err(join_error)?
        .map_err(error_response)?;
    state.traces.insert(trace.clone()).await.map_err(store_error)?;
    Ok(Json(trace))
}

/// Similarity over long steps is quadratic, so it runs on the blocking pool.
async fn should_continue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VocRequest>,
) -> ApiResult<VocResult> {
    tokio::task::spawn_blocking(move || state.economist.should_continue_with(&req.trace, &req.options))
        .await
        .map_err(join_error)?
        .map(Json)
        .map_err(error_response)
}

async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<EconomicTrace> {
    state
        .traces
        .get(id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Trace {} not found", id)))
}

async fn delete_trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.traces.remove(id).await.map_err(store_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Trace {} not found", id)))
    }
}

async fn reconcile_trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReconcileRequest>,
) -> ApiResult<CalibrationResult> {
    let handle = state
        .traces
        .handle(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Trace {} not found", id)))?;

    let mut trace = handle.lock().await;
    state
        .economist
        .reconcile(&mut trace, req.actual_cost)
        .map(Json)
        .map_err(error_response)
}

async fn get_rates(State(state): State<Arc<AppState>>) -> Json<RateTable> {
    let table = state.economist.catalog().snapshot();
    Json(RateTable::clone(&table))
}

/// Replace the whole rate table. In-flight decisions finish on the old one.
async fn put_rates(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<RateTableSpec>,
) -> ApiResult<RatesUpdatedResponse> {
    let table = RateTable::try_from(spec).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let models = table.len();
    let previous = state.economist.catalog().replace(table);
    Ok(Json(RatesUpdatedResponse {
        models,
        previous_models: previous.len(),
    }))
}

async fn get_calibration(State(state): State<Arc<AppState>>) -> Json<CalibrationStats> {
    Json(state.economist.calibration())
}
