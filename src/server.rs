//! HTTP control surface.
//!
//! `POST /execute` turns a query into an initial graph via the external
//! decomposer, runs it, and returns the structured result. `GET /health`
//! reports liveness; `GET /debug/metrics` exposes the retry counters for
//! run diagnostics on the same port.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::instrument;

use crate::dispatch::{DecomposeRequest, DispatchError, RpcCode, WorkerDispatcher};
use crate::executor::{cancel_channel, DagExecutor};

/// Request body for `POST /execute`.
#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteRequest {
    pub query: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub context: FxHashMap<String, String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Response body for `POST /execute`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExecuteResponse {
    pub run_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_uri: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<DagExecutor>,
    pub dispatcher: Arc<dyn WorkerDispatcher>,
}

/// Build the router for the control surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(handle_execute))
        .route("/health", get(handle_health))
        .route("/debug/metrics", get(handle_debug_metrics))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "orchestrator server listening");
    axum::serve(listener, router(state).into_make_service()).await
}

fn status_for_dispatch_error(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Status {
            code: RpcCode::InvalidArgument,
            ..
        }
        | DispatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DispatchError::Timeout
        | DispatchError::Status {
            code: RpcCode::DeadlineExceeded,
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[instrument(skip(state, request), fields(run_id))]
async fn handle_execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::Span::current().record("run_id", run_id.as_str());

    if request.query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ExecuteResponse {
                run_id,
                success: false,
                error_message: "query is required".to_string(),
                ..ExecuteResponse::default()
            }),
        );
    }

    let mut context = request.context.clone();
    if let Some(provider) = &request.provider {
        context.insert("provider".to_string(), provider.clone());
    }

    tracing::info!(query = %request.query, "received execute request");

    let mut graph = match state
        .dispatcher
        .decompose(DecomposeRequest {
            query: request.query.clone(),
            context,
            run_id: run_id.clone(),
        })
        .await
    {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!(error = %err, "query decomposition failed");
            return (
                status_for_dispatch_error(&err),
                Json(ExecuteResponse {
                    run_id,
                    success: false,
                    error_message: format!("query decomposition failed: {err}"),
                    ..ExecuteResponse::default()
                }),
            );
        }
    };

    tracing::info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "graph created"
    );

    let (_cancel_tx, cancel) = cancel_channel();
    match state.executor.execute(&mut graph, &run_id, cancel).await {
        Ok(result) => (
            StatusCode::OK,
            Json(ExecuteResponse {
                run_id,
                success: result.success,
                report: result.final_report,
                artifact_uri: result.artifact_uri,
                error_message: result.error_message,
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "execution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecuteResponse {
                    run_id,
                    success: false,
                    error_message: format!("execution failed: {err}"),
                    ..ExecuteResponse::default()
                }),
            )
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn handle_debug_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let metrics = state.executor.metrics().all_metrics();
    Json(json!({
        "nodes": metrics,
        "summary": state.executor.metrics().summary(),
    }))
}
