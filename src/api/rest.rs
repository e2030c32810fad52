//! REST API Handlers
//!
//! Health, settings and snapshot endpoints. Health answers come from the last
//! probe and never wait for one. Work that may touch the network runs on its
//! own task, bounded by the request timeout.

use crate::cluster::{CassandraAdapterDelegate, InstancesConfig};
use crate::domain::{NodeSettings, SnapshotOptions};
use crate::error::{Error, Result};
use crate::metrics::SidecarMetrics;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceQuery {
    #[serde(default)]
    pub instance_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    fn ok() -> Self {
        Self { status: "OK".into() }
    }

    fn not_ok() -> Self {
        Self {
            status: "NOT_OK".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::InvalidArgument(_) | Error::JsonParse(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::InstanceNotFound { .. } => (StatusCode::NOT_FOUND, "instance_not_found"),
            Error::AdapterUnavailable { .. }
            | Error::SessionUnavailable { .. }
            | Error::ManagementUnavailable { .. }
            | Error::Timeout { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Error::RemoteInvocation { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "remote_invocation_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ApiErrorResponse {
                error: code.into(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// REST Router
// =============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub instances: Arc<InstancesConfig>,
    pub metrics: Arc<SidecarMetrics>,
    pub request_timeout: Duration,
}

pub struct RestRouter {
    state: ApiState,
}

impl RestRouter {
    pub fn new(state: ApiState) -> Self {
        Self { state }
    }

    pub fn build(self) -> Router {
        Router::new()
            .route("/api/v1/__health", get(sidecar_health))
            .route("/api/v1/cassandra/__health", get(cassandra_health))
            .route("/api/v1/cassandra/instance/:id/__health", get(instance_health))
            .route("/api/v1/cassandra/settings", get(cassandra_settings))
            .route(
                "/api/v1/keyspace/:keyspace/table/:table/snapshots/:snapshot",
                put(take_snapshot),
            )
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

/// Run delegate work on its own task, bounded by the request timeout
async fn offload<T, F>(timeout: Duration, operation: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::spawn(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Internal(format!("{} task failed: {}", operation, e))),
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}

fn delegate_for(state: &ApiState, id: Option<u32>) -> Result<Arc<CassandraAdapterDelegate>> {
    Ok(state.instances.resolve(id)?.delegate().clone())
}

fn health_of(delegate: &CassandraAdapterDelegate) -> Response {
    if delegate.is_up() {
        (StatusCode::OK, Json(HealthResponse::ok())).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::not_ok())).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn sidecar_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn cassandra_health(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> std::result::Result<Response, ApiError> {
    let delegate = delegate_for(&state, query.instance_id)?;
    Ok(health_of(&delegate))
}

async fn instance_health(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
) -> std::result::Result<Response, ApiError> {
    let delegate = delegate_for(&state, Some(id))?;
    Ok(health_of(&delegate))
}

async fn cassandra_settings(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> std::result::Result<Response, ApiError> {
    let delegate = delegate_for(&state, query.instance_id)?;
    let settings: Option<NodeSettings> = offload(state.request_timeout, "settings", async move {
        Ok(delegate.get_settings().await)
    })
    .await?;

    Ok(match settings {
        Some(settings) => (StatusCode::OK, Json(settings)).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::not_ok())).into_response(),
    })
}

async fn take_snapshot(
    State(state): State<ApiState>,
    Path((keyspace, table, snapshot)): Path<(String, String, String)>,
    Query(query): Query<InstanceQuery>,
    body: Bytes,
) -> std::result::Result<Json<SnapshotResponse>, ApiError> {
    let options: Option<SnapshotOptions> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice(&body).map_err(Error::from)?)
    };

    let delegate = delegate_for(&state, query.instance_id)?;
    info!(
        "Snapshot {} requested for {}.{} on instance {}",
        snapshot,
        keyspace,
        table,
        delegate.instance_id()
    );

    offload(state.request_timeout, "snapshot", async move {
        delegate
            .storage_operations()?
            .take_snapshot(&snapshot, &keyspace, &table, options.as_ref())
            .await
    })
    .await
    .map_err(|e| {
        if !e.is_transient() {
            error!("Snapshot failed: {}", e);
        }
        ApiError(e)
    })?;

    Ok(Json(SnapshotResponse {
        result: "Success".into(),
    }))
}

async fn metrics(State(state): State<ApiState>) -> std::result::Result<Response, ApiError> {
    let text = state.metrics.encode(&state.instances)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}
