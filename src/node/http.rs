//! Callback endpoints a server node exposes to the coordinator

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::wire::PayloadBody;
use crate::common::{Error, Invalidation};
use crate::node::server_node::ServerNode;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct NodeHttpState {
    pub node: Arc<ServerNode>,
}

pub fn create_router(state: NodeHttpState) -> Router {
    Router::new()
        .route("/invalidate/reader", post(invalidate_reader))
        .route("/invalidate/writer", post(invalidate_writer))
        .route(
            "/invalidate/writer-for-reader",
            post(invalidate_writer_for_reader),
        )
        .route("/health/live", get(health_live))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

async fn invalidate_reader(
    State(state): State<NodeHttpState>,
    Json(inv): Json<Invalidation>,
) -> Result<StatusCode, Error> {
    state.node.invalidate_reader(inv).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invalidate_writer(
    State(state): State<NodeHttpState>,
    Json(inv): Json<Invalidation>,
) -> Result<Json<PayloadBody>, Error> {
    let payload = state.node.invalidate_writer(inv).await?;
    Ok(Json(PayloadBody { payload }))
}

async fn invalidate_writer_for_reader(
    State(state): State<NodeHttpState>,
    Json(inv): Json<Invalidation>,
) -> Result<Json<PayloadBody>, Error> {
    let payload = state.node.invalidate_writer_for_reader(inv).await?;
    Ok(Json(PayloadBody { payload }))
}

async fn health_live(State(state): State<NodeHttpState>) -> Result<impl IntoResponse, Error> {
    state.node.liveness_probe()?;
    Ok(Json(json!({ "status": "alive", "server": state.node.id() })))
}
