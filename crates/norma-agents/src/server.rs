//! HTTP surface over the orchestrator service.
//!
//! | Route                   | Status codes                                  |
//! |-------------------------|-----------------------------------------------|
//! | `POST /analyze`         | 200 ok (incl. no-change runs), 400 empty      |
//! |                         | input, 500 pipeline failure, 503 dependency   |
//! | `GET /health`           | 200 with store availability                   |
//! | `GET /audit/{id}`       | 200 record, 404 unknown, 503 store offline    |
//!
//! The optional `X-LLM-API-Key` header overrides the configured key for that
//! request only. Runs execute in a spawned task, so a client disconnect
//! drops the response future but the run itself continues to completion and
//! is audited.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::service::{AnalysisService, ServiceError};

/// Request-scoped API-key override header.
const API_KEY_HEADER: &str = "x-llm-api-key";

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    regulatory_text: String,
    repo_path: Option<String>,
}

/// Build the router over a shared service.
pub fn router(service: Arc<AnalysisService>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .route("/audit/:execution_id", get(audit))
        .with_state(service)
}

/// Bind and serve until the process is stopped.
pub async fn serve(service: Arc<AnalysisService>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "http server listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn analyze(
    State(service): State<Arc<AnalysisService>>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from);

    let run = tokio::spawn(async move {
        service
            .analyze(
                &request.regulatory_text,
                request.repo_path.as_deref(),
                api_key.as_deref(),
            )
            .await
    });

    let result = match run.await {
        Ok(result) => result,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("run task failed: {e}") })),
            )
                .into_response()
        }
    };

    match result {
        Ok(outcome) => {
            if let Some(error) = &outcome.state.error {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "execution_id": outcome.state.execution_id,
                        "error": error,
                    })),
                )
                    .into_response()
            } else {
                (StatusCode::OK, Json(outcome)).into_response()
            }
        }
        Err(e) => error_response(e),
    }
}

async fn health(State(service): State<Arc<AnalysisService>>) -> Response {
    (StatusCode::OK, Json(service.health().await)).into_response()
}

async fn audit(
    State(service): State<Arc<AnalysisService>>,
    Path(execution_id): Path<String>,
) -> Response {
    match service.audit_record(&execution_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution not found", "execution_id": execution_id })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: ServiceError) -> Response {
    let status = match &error {
        ServiceError::EmptyInput => StatusCode::BAD_REQUEST,
        ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
