//! HTTP API: session operations, health checks, and Prometheus metrics
//!
//! A thin JSON mapping over the pipeline operations; all semantics live in
//! the library. Rejected requests (bad interval, unobservable target,
//! unknown session) map to 4xx; everything else the pipeline handles
//! internally.

use procsight_lib::{
    anomaly::{AnomalyClassifier, OnnxScorer},
    collector::{create_source, Target},
    health::{ComponentHealth, ComponentStatus, HealthRegistry},
    models::{LockEvent, Sample},
    observability::PipelineMetrics,
    session::{SessionError, SessionRegistry},
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub registry: SessionRegistry,
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
    pub model_path: Option<PathBuf>,
    pub default_interval_secs: f64,
    pub default_duration_secs: f64,
}

impl AppState {
    pub fn new(
        registry: SessionRegistry,
        health_registry: HealthRegistry,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            registry,
            health_registry,
            metrics,
            model_path: None,
            default_interval_secs: 1.0,
            default_duration_secs: 60.0,
        }
    }

    pub fn with_model_path(mut self, model_path: Option<PathBuf>) -> Self {
        self.model_path = model_path;
        self
    }

    pub fn with_defaults(mut self, interval_secs: f64, duration_secs: f64) -> Self {
        self.default_interval_secs = interval_secs;
        self.default_duration_secs = duration_secs;
        self
    }

    /// Select the scorer for a new session: the configured model when it
    /// loads, the rule-based scorer otherwise. A broken model is degraded
    /// mode, not an error.
    async fn build_classifier(&self) -> AnomalyClassifier {
        let Some(path) = &self.model_path else {
            return AnomalyClassifier::rule_based();
        };
        match OnnxScorer::from_file(path) {
            Ok(scorer) => AnomalyClassifier::with_scorer(Box::new(scorer)),
            Err(error) => {
                warn!(
                    model_path = %path.display(),
                    error = %error,
                    "Anomaly model failed to load, using rule-based scorer"
                );
                self.health_registry
                    .update(
                        procsight_lib::health::components::CLASSIFIER,
                        ComponentHealth::degraded("anomaly model unavailable"),
                    )
                    .await;
                AnomalyClassifier::rule_based_fallback()
            }
        }
    }
}

/// Errors surfaced to API callers.
struct ApiError(SessionError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
            SessionError::InvalidTarget(_) | SessionError::InvalidInterval(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        let body = Json(json!({
            "status": "error",
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        Self(error)
    }
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    /// Target pid; absent means whole-host profiling.
    pid: Option<i32>,
    interval_secs: Option<f64>,
    duration_secs: Option<f64>,
    /// When false the session is fed externally through the push
    /// endpoints instead of the procfs sampler.
    #[serde(default = "default_collect")]
    collect: bool,
}

fn default_collect() -> bool {
    true
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = match request.pid {
        Some(pid) => Target::Process(pid),
        None => Target::Host,
    };
    let interval = request.interval_secs.unwrap_or(state.default_interval_secs);
    let duration = request.duration_secs.unwrap_or(state.default_duration_secs);
    let source = request.collect.then(|| create_source(target));
    let classifier = state.build_classifier().await;

    let session_id = state
        .registry
        .start_session(target, interval, duration, source, classifier)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "session_id": session_id })),
    ))
}

async fn push_sample(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(sample): Json<Sample>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.push_sample(id, sample)?;
    Ok(Json(json!({ "status": "success" })))
}

async fn push_lock_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(event): Json<LockEvent>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.push_lock_event(id, &event)?;
    Ok(Json(json!({ "status": "success" })))
}

async fn get_phases(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let phases = state.registry.get_phases(id)?;
    Ok(Json(json!({ "status": "success", "phases": phases })))
}

async fn get_deadlock_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.registry.get_deadlock_analysis(id)?;
    Ok(Json(json!({
        "status": "success",
        "analysis": report.analysis,
        "cycles": report.cycles,
        "nodes": report.nodes,
        "edges": report.edges,
        "historical_deadlocks": [],
    })))
}

async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.registry.get_alerts(id)?;
    let using_fallback = state.registry.session(id)?.using_fallback_classifier();
    Ok(Json(json!({
        "status": "success",
        "alerts": alerts,
        "using_fallback_classifier": using_fallback,
    })))
}

async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.registry.stop_session(id)?;
    Ok(Json(json!({ "status": "success", "summary": summary })))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id/samples", post(push_sample))
        .route("/api/sessions/:id/lock-events", post(push_lock_event))
        .route("/api/sessions/:id/phases", get(get_phases))
        .route("/api/sessions/:id/deadlock", get(get_deadlock_analysis))
        .route("/api/sessions/:id/alerts", get(get_alerts))
        .route("/api/sessions/:id/stop", post(stop_session))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
