//! Integration tests for the daemon API endpoints
//!
//! Builds the same router wiring as the daemon (sessions fed through the
//! push endpoints, no procfs sampler) and drives it in process with tower.

use procsight_lib::{
    anomaly::AnomalyClassifier,
    collector::Target,
    health::{ComponentStatus, HealthRegistry},
    models::{LockEvent, PhaseSegment, Sample},
    observability::PipelineMetrics,
    session::{SessionError, SessionRegistry},
};

use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct AppState {
    registry: SessionRegistry,
    health_registry: HealthRegistry,
}

struct ApiError(SessionError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
            SessionError::InvalidTarget(_) | SessionError::InvalidInterval(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        (status, Json(json!({ "status": "error", "message": self.0.to_string() })))
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        Self(error)
    }
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let interval = request["interval_secs"].as_f64().unwrap_or(1.0);
    let duration = request["duration_secs"].as_f64().unwrap_or(60.0);
    let session_id = state
        .registry
        .start_session(
            Target::Host,
            interval,
            duration,
            None,
            AnomalyClassifier::rule_based(),
        )
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

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

fn test_router() -> Router {
    let _ = PipelineMetrics::new();
    let state = Arc::new(AppState {
        registry: SessionRegistry::new(),
        health_registry: HealthRegistry::new(),
    });
    Router::new()
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id/samples", post(push_sample))
        .route("/api/sessions/:id/lock-events", post(push_lock_event))
        .route("/api/sessions/:id/phases", get(get_phases))
        .route("/api/sessions/:id/deadlock", get(get_deadlock_analysis))
        .route("/api/sessions/:id/alerts", get(get_alerts))
        .route("/api/sessions/:id/stop", post(stop_session))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn request_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn sample_body(timestamp: f64, cpu: f64, mem: f64) -> Value {
    json!({
        "timestamp": timestamp,
        "cpu_percent": cpu,
        "memory_percent": mem,
        "memory_used_gb": mem / 12.0,
        "disk_read_mb": 0.0,
        "disk_write_mb": 0.0,
        "network_sent_mb": 0.0,
        "network_recv_mb": 0.0,
    })
}

async fn create_session(router: &Router) -> u64 {
    let (status, body) = request_json(
        router,
        "POST",
        "/api/sessions",
        Some(json!({ "interval_secs": 1.0, "duration_secs": 60.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_invalid_interval_rejected() {
    let router = test_router();
    let (status, body) = request_json(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "interval_secs": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let router = test_router();
    let (status, _) = request_json(&router, "GET", "/api/sessions/999/phases", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_round_trip() {
    let router = test_router();
    let id = create_session(&router).await;

    for i in 0..10 {
        let (status, _) = request_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/samples"),
            Some(sample_body(i as f64, 20.0 + 8.4 * i as f64, 30.0)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = request_json(&router, "GET", &format!("/api/sessions/{id}/phases"), None).await;
    assert_eq!(status, StatusCode::OK);
    let phases: Vec<PhaseSegment> = serde_json::from_value(body["phases"].clone()).unwrap();
    assert!(!phases.is_empty());
    assert_eq!(body["phases"].as_array().unwrap().last().unwrap()["type"], "cpu_bound");

    let (status, body) = request_json(&router, "GET", &format!("/api/sessions/{id}/alerts"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["using_fallback_classifier"], false);
    let alert_types: Vec<&str> = body["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["anomaly_type"].as_str().unwrap())
        .collect();
    assert!(alert_types.contains(&"CRYPTO_MINING"));

    let (status, body) = request_json(&router, "POST", &format!("/api/sessions/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["sample_count"], 10);
    assert_eq!(body["summary"]["ended_early"], false);
}

#[tokio::test]
async fn test_deadlock_endpoint_shape() {
    let router = test_router();
    let id = create_session(&router).await;

    // No lock events yet: heuristic mode with empty graph rendering.
    let (status, body) =
        request_json(&router, "GET", &format!("/api/sessions/{id}/deadlock"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"]["has_cycles"], false);
    assert_eq!(body["analysis"]["mode"], "thread_census");
    assert!(body["nodes"].as_array().unwrap().is_empty());
    assert!(body["historical_deadlocks"].as_array().unwrap().is_empty());

    // Two threads acquiring each other's locks produce one cycle.
    let events = [
        json!({ "thread_id": 1, "lock_id": "a", "action": "acquire", "timestamp": 0.0 }),
        json!({ "thread_id": 2, "lock_id": "b", "action": "acquire", "timestamp": 1.0 }),
        json!({ "thread_id": 1, "lock_id": "b", "action": "wait_start", "timestamp": 2.0 }),
        json!({ "thread_id": 2, "lock_id": "a", "action": "wait_start", "timestamp": 3.0 }),
    ];
    for event in events {
        let (status, _) = request_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/lock-events"),
            Some(event),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) =
        request_json(&router, "GET", &format!("/api/sessions/{id}/deadlock"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"]["has_cycles"], true);
    assert_eq!(body["analysis"]["cycle_count"], 1);
    assert_eq!(body["analysis"]["risk_level"], "high");
    assert_eq!(body["analysis"]["mode"], "wait_for_graph");
    assert_eq!(body["analysis"]["total_locks_tracked"], 2);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["nodes"][0]["type"], "thread");
    assert_eq!(body["edges"].as_array().unwrap().len(), 2);
    assert_eq!(body["edges"][0]["type"], "wait-for");
}

#[tokio::test]
async fn test_push_after_stop_is_noop() {
    let router = test_router();
    let id = create_session(&router).await;

    request_json(
        &router,
        "POST",
        &format!("/api/sessions/{id}/samples"),
        Some(sample_body(0.0, 50.0, 40.0)),
    )
    .await;
    request_json(&router, "POST", &format!("/api/sessions/{id}/stop"), None).await;

    // Not an error, just dropped.
    let (status, _) = request_json(
        &router,
        "POST",
        &format!("/api/sessions/{id}/samples"),
        Some(sample_body(1.0, 50.0, 40.0)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request_json(&router, "POST", &format!("/api/sessions/{id}/stop"), None).await;
    assert_eq!(body["summary"]["sample_count"], 1);
}

#[tokio::test]
async fn test_healthz_reports_components() {
    let router = test_router();
    let (status, body) = request_json(&router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
