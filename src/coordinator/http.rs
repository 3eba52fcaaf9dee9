//! HTTP API for the coordinator
//!
//! Thin adapter from JSON requests to [`Coordinator`] calls. Protocol
//! errors come back as `{kind, message}` bodies with a matching status.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::wire::{
    AllocatedId, CallerRequest, LookupRequest, RegisterRequest, ServiceInfo, StatusReport,
    COORDINATOR_SERVICE,
};
use crate::common::{Error, Grant, ObjectId, ObjectRef};
use crate::coordinator::core::Coordinator;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (payloads travel base64-encoded)
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub coordinator: Arc<Coordinator>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/service", get(service_info))
        .route("/health/live", get(health_live))
        .route("/objects/allocate", post(allocate_id))
        .route("/objects/register", post(register_object))
        .route("/objects/lookup", post(lookup_object))
        .route("/objects/:id/read", post(acquire_read))
        .route("/objects/:id/write", post(acquire_write))
        .route("/servers/terminate", post(terminate))
        .route("/admin/status", get(admin_status))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: COORDINATOR_SERVICE.to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn health_live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

async fn allocate_id(State(state): State<CoordState>) -> Result<Json<AllocatedId>, Error> {
    let id = state.coordinator.allocate_id().await?;
    Ok(Json(AllocatedId { id }))
}

async fn register_object(
    State(state): State<CoordState>,
    Json(req): Json<RegisterRequest>,
) -> Result<StatusCode, Error> {
    state
        .coordinator
        .register_object(&req.name, req.id, req.payload, &req.caller)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lookup_object(
    State(state): State<CoordState>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<ObjectRef>, Error> {
    let found = state.coordinator.lookup_object(&req.name, &req.caller).await?;
    Ok(Json(found))
}

async fn acquire_read(
    State(state): State<CoordState>,
    Path(id): Path<ObjectId>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Grant>, Error> {
    Ok(Json(state.coordinator.acquire_read(id, &req.caller).await?))
}

async fn acquire_write(
    State(state): State<CoordState>,
    Path(id): Path<ObjectId>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Grant>, Error> {
    Ok(Json(state.coordinator.acquire_write(id, &req.caller).await?))
}

async fn terminate(
    State(state): State<CoordState>,
    Json(req): Json<CallerRequest>,
) -> Result<StatusCode, Error> {
    state.coordinator.terminate(&req.caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_status(State(state): State<CoordState>) -> Json<StatusReport> {
    Json(state.coordinator.status().await)
}

async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    (StatusCode::OK, state.coordinator.metrics().to_prometheus())
}
