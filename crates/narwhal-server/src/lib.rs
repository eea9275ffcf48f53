//! HTTP surface for the container service.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use narwhal_common::{
    BasicContainerStatistics, LogQuery, NodeResourceUsage, SimpleCreateRequest,
};
use narwhal_engine::bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, ContainerSummary,
};
use narwhal_engine::{AdvancedCreateRequest, ContainerService};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
mod error;

pub use config::ServerConfig;
pub use error::ApiError;

pub const PLAIN_LOGS_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const FRAMED_LOGS_CONTENT_TYPE: &str = "application/vnd.docker.multiplexed-stream";

#[derive(Clone)]
pub struct AppState {
    pub service: ContainerService,
}

impl AppState {
    pub fn new(service: ContainerService) -> Self {
        Self { service }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/node/resource_usage", get(node_resource_usage))
        .route("/containers", get(list_containers))
        .route("/containers/list", get(list_containers))
        .route("/containers/create_simple", post(create_simple))
        .route("/containers/create", post(create_container))
        .route("/containers/:id", get(get_container).delete(remove_container))
        .route("/containers/:id/stats", get(container_stats))
        .route("/containers/:id/start", get(start_container).post(start_container))
        .route("/containers/:id/stop", get(stop_container).post(stop_container))
        .route("/containers/:id/logs", get(container_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Query flags are on only when given as the literal `true`.
fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    all: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoveParams {
    force: Option<String>,
    remove_volumes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LogParams {
    lines: Option<String>,
    since: Option<String>,
    stream: Option<String>,
    framed: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let (status, engine) = match state.service.ping().await {
        Ok(()) => ("healthy", "reachable".to_string()),
        Err(e) => {
            warn!(error = %e, "Engine ping failed");
            ("degraded", e.to_string())
        }
    };
    Json(json!({
        "status": status,
        "engine": engine,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn node_resource_usage(
    State(state): State<AppState>,
) -> Result<Json<NodeResourceUsage>, ApiError> {
    Ok(Json(state.service.node_usage().await?))
}

async fn list_containers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ContainerSummary>>, ApiError> {
    Ok(Json(state.service.list(flag(&params.all)).await?))
}

async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerInspectResponse>, ApiError> {
    Ok(Json(state.service.get(&id).await?))
}

async fn container_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BasicContainerStatistics>, ApiError> {
    Ok(Json(state.service.statistics(&id).await?))
}

async fn create_simple(
    State(state): State<AppState>,
    payload: Result<Json<SimpleCreateRequest>, JsonRejection>,
) -> Result<Json<ContainerCreateResponse>, ApiError> {
    let Json(req) = payload?;
    let created = state.service.create_simple(req).await?;
    info!(container_id = %created.id, "Simple create completed");
    Ok(Json(created))
}

/// Echoes the accepted request back on success.
async fn create_container(
    State(state): State<AppState>,
    payload: Result<Json<AdvancedCreateRequest>, JsonRejection>,
) -> Result<Json<AdvancedCreateRequest>, ApiError> {
    let Json(req) = payload?;
    state.service.create(&req).await?;
    Ok(Json(req))
}

async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<String>, ApiError> {
    state.service.start(&id).await?;
    Ok(Json(id))
}

async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<String>, ApiError> {
    state.service.stop(&id).await?;
    Ok(Json(id))
}

async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RemoveParams>,
) -> Result<Json<String>, ApiError> {
    state
        .service
        .remove(&id, flag(&params.force), flag(&params.remove_volumes))
        .await?;
    Ok(Json(id))
}

/// Streams log chunks straight into the response body until the engine
/// closes the stream or the client goes away.
async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Response, ApiError> {
    let query = LogQuery::from_params(
        params.lines.as_deref(),
        params.since.as_deref(),
        params.stream.as_deref(),
    );
    let framed = flag(&params.framed);
    let stream = state.service.logs(&id, &query).await?;

    let body = stream.map(move |item| match item {
        Ok(chunk) => Ok(chunk.encode(framed)),
        Err(e) => {
            warn!(container_id = %id, error = %e, "Log stream aborted by engine");
            Err(e)
        }
    });
    let content_type = if framed {
        FRAMED_LOGS_CONTENT_TYPE
    } else {
        PLAIN_LOGS_CONTENT_TYPE
    };
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}
