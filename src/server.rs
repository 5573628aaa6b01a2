//! HTTP API for task reviews.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message |
//! | `GET`  | `/health` | Index status for the configured embedding space |
//! | `POST` | `/review` | Review one task |
//!
//! # Error Contract
//!
//! Error responses carry a machine-readable code:
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "task_id must not be empty" } }
//! ```
//!
//! Error codes: `validation_error` (422), `unavailable` (503).
//!
//! A review that could not be completed is still a `200` with
//! `"success": false`; its `data` carries the `retry_request` fallback.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Instrument};

use task_review_core::models::Stage;
use task_review_core::ReviewResult;

use crate::config::Config;
use crate::service::{Health, ReviewService};

pub const MAX_TASK_ID_CHARS: usize = 255;
pub const MAX_DETAILS_CHARS: usize = 10_000;

/// Rejected even when the tag is never closed.
const DANGEROUS_TAGS: [&str; 4] = ["script", "iframe", "object", "embed"];

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReviewService>,
}

/// Build the router; split out from [`run_server`] so tests can serve it on
/// an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/review", post(handle_review))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = ReviewService::from_config(config).await?;
    let app = build_router(AppState {
        service: Arc::new(service),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "review server listening");
    println!("Review server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn validation_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "validation_error",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "welcome": "Welcome to Automated Task Review API" }))
}

// ============ GET /health ============

async fn handle_health(State(state): State<AppState>) -> Result<Json<Health>, AppError> {
    state.service.health().await.map(Json).map_err(|e| {
        warn!(error = %e, "health check failed");
        unavailable(e.to_string())
    })
}

// ============ POST /review ============

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub task_id: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
struct ReviewResponse {
    success: bool,
    message: &'static str,
    data: ReviewResult,
}

async fn handle_review(
    State(state): State<AppState>,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<ReviewResponse>, AppError> {
    let Json(request) = payload.map_err(|e| validation_error(e.body_text()))?;
    let (task_id, details) = validate_request(&request).map_err(validation_error)?;

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("request", %request_id, task_id = %task_id);
    let result = state
        .service
        .review(task_id, details)
        .instrument(span)
        .await;

    let success = result.stage != Stage::Failed;
    Ok(Json(ReviewResponse {
        success,
        message: if success {
            "review completed"
        } else {
            "review failed"
        },
        data: result,
    }))
}

/// Check request fields, returning the trimmed task id and details.
pub fn validate_request(request: &ReviewRequest) -> Result<(&str, &str), String> {
    let task_id = request.task_id.trim();
    if task_id.is_empty() {
        return Err("task_id must not be empty".to_string());
    }
    if task_id.chars().count() > MAX_TASK_ID_CHARS {
        return Err(format!(
            "task_id must be at most {} characters",
            MAX_TASK_ID_CHARS
        ));
    }

    let details = request.details.trim();
    if details.is_empty() {
        return Err("details must not be empty".to_string());
    }
    if details.chars().count() > MAX_DETAILS_CHARS {
        return Err(format!(
            "details must be at most {} characters",
            MAX_DETAILS_CHARS
        ));
    }
    if contains_markup(details) {
        return Err("details must not contain markup tags".to_string());
    }

    Ok((task_id, details))
}

/// True when `text` contains something shaped like an HTML/XML tag.
fn contains_markup(text: &str) -> bool {
    let bytes = text.as_bytes();
    for (start, _) in text.match_indices('<') {
        let rest = &bytes[start + 1..];
        let name_start = usize::from(rest.first() == Some(&b'/'));
        let Some(first) = rest.get(name_start) else {
            continue;
        };
        if !first.is_ascii_alphabetic() {
            continue;
        }
        let name_end = rest[name_start..]
            .iter()
            .position(|b| !b.is_ascii_alphanumeric() && *b != b'-')
            .map(|p| p + name_start)
            .unwrap_or(rest.len());
        if rest[name_end..].contains(&b'>') || is_dangerous_tag(&rest[name_start..name_end]) {
            return true;
        }
    }
    false
}

fn is_dangerous_tag(name: &[u8]) -> bool {
    DANGEROUS_TAGS
        .iter()
        .any(|tag| name.eq_ignore_ascii_case(tag.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task_id: &str, details: &str) -> ReviewRequest {
        ReviewRequest {
            task_id: task_id.to_string(),
            details: details.to_string(),
        }
    }

    #[test]
    fn test_valid_request_is_trimmed() {
        let req = request("  T-1 ", "  Book a hotel  ");
        assert_eq!(validate_request(&req).unwrap(), ("T-1", "Book a hotel"));
    }

    #[test]
    fn test_blank_fields_rejected() {
        assert!(validate_request(&request("   ", "details")).is_err());
        assert!(validate_request(&request("T-1", "\n\t ")).is_err());
    }

    #[test]
    fn test_length_limits() {
        let long_id = "x".repeat(MAX_TASK_ID_CHARS + 1);
        assert!(validate_request(&request(&long_id, "ok")).is_err());
        let max_id = "x".repeat(MAX_TASK_ID_CHARS);
        assert!(validate_request(&request(&max_id, "ok")).is_ok());

        let long_details = "y".repeat(MAX_DETAILS_CHARS + 1);
        assert!(validate_request(&request("T-1", &long_details)).is_err());
    }

    #[test]
    fn test_markup_rejected() {
        assert!(contains_markup("hello <b>world</b>"));
        assert!(contains_markup("<script>alert(1)</script>"));
        assert!(contains_markup("<SCRIPT src=x"));
        assert!(contains_markup("close </div>"));
        assert!(!contains_markup("budget < 500 and > 100"));
        assert!(!contains_markup("a <= b"));
        assert!(!contains_markup("plain text"));
        assert!(validate_request(&request("T-1", "see <img src=x>")).is_err());
    }
}
