//! The relay HTTP API.
//!
//! Implements the endpoint behind the chat page:
//! - POST /api/generate — prompt in, completion out (JSON body or SSE stream)
//! - GET /health
//!
//! Validation failures and pipeline failures answer with a JSON error body
//! carrying a generic message; internal detail only ever reaches the logs.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::pipeline::template::PromptTemplate;
use crate::pipeline::{CompletionBackend, CompletionEvent, CompletionRequest};
use crate::server::streaming::completion_to_sse_stream;

/// Application state shared across handlers.
pub struct AppState {
    pub backend: Arc<dyn CompletionBackend>,
    pub template: PromptTemplate,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Generate request.
///
/// `prompt` is defaulted so an absent field turns into an empty string and
/// gets the same 400 as an explicit empty prompt.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,

    /// Stream the completion as SSE records instead of one JSON body.
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming success response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub result: String,
}

/// Error response body, shared by all failure paths.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// Client-facing API errors. Messages are deliberately generic.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("prompt is required")]
    MissingPrompt,

    #[error("invalid request body")]
    InvalidBody,

    #[error("failed to process the request")]
    Pipeline,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingPrompt | ApiError::InvalidBody => StatusCode::BAD_REQUEST,
            ApiError::Pipeline => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn generate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    // A body that does not deserialize (bad JSON, non-string prompt) is a
    // client error with the same JSON shape as every other failure.
    let Json(req) = body.map_err(|e| {
        debug!(error = %e, "Rejected request body");
        ApiError::InvalidBody
    })?;

    // Reject before touching the pipeline. The prompt itself is forwarded
    // untouched; only the emptiness check trims.
    if req.prompt.trim().is_empty() {
        return Err(ApiError::MissingPrompt);
    }

    let request_id = Uuid::new_v4().to_string();

    info!(
        request_id = request_id,
        stream = req.stream,
        prompt_chars = req.prompt.len(),
        "Generate request"
    );

    let request = CompletionRequest {
        request_id: request_id.clone(),
        messages: state.template.render(&req.prompt),
    };

    let rx = state.backend.stream_completion(request).await;

    if req.stream {
        // Streaming response via SSE records.
        let stream = completion_to_sse_stream(rx, request_id);
        Ok((
            [
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Sse::new(stream).keep_alive(KeepAlive::default()),
        )
            .into_response())
    } else {
        // Non-streaming: collect all tokens before answering.
        let text = collect_completion(rx, &request_id).await?;
        Ok(Json(GenerateResponse { result: text }).into_response())
    }
}

/// Drain the event channel into the full completion text.
async fn collect_completion(
    mut rx: mpsc::Receiver<CompletionEvent>,
    request_id: &str,
) -> Result<String, ApiError> {
    let mut text = String::new();

    while let Some(event) = rx.recv().await {
        match event {
            CompletionEvent::Token { text: t } => text.push_str(&t),
            CompletionEvent::Done { completion_tokens } => {
                debug!(
                    request_id = request_id,
                    completion_tokens = completion_tokens,
                    "Completion collected"
                );
                break;
            }
            CompletionEvent::Error(detail) => {
                error!(request_id = request_id, error = detail, "Completion pipeline failed");
                return Err(ApiError::Pipeline);
            }
        }
    }

    Ok(text)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_prompt_maps_to_400_json() {
        let response = ApiError::MissingPrompt.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"error":"prompt is required"}"#);
    }

    #[tokio::test]
    async fn test_pipeline_error_maps_to_500_json() {
        let response = ApiError::Pipeline.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"error":"failed to process the request"}"#);
    }
}
