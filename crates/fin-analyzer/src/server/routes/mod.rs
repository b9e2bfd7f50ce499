//! API routes for the analysis server

pub mod analyze;
pub mod status;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::server::state::AppState;

/// Submission and status routes
pub fn analysis_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Submission - with larger body limit for file uploads
        .route(
            "/analyze",
            post(analyze::analyze_document).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/status/:job_id", get(status::get_job_status))
}

/// Routes nested under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.broker().stats().await?;
    let config = state.config();

    Ok(Json(json!({
        "name": "fin-analyzer",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Asynchronous financial document analysis with queued jobs and status polling",
        "endpoints": {
            "POST /analyze": "Upload a document (multipart 'file', optional 'query') and queue it",
            "GET /status/:job_id": "Poll job state: PENDING, STARTED, SUCCESS or FAILURE",
            "GET /health": "Liveness probe",
            "GET /ready": "Readiness probe",
            "GET /api/info": "This description and queue statistics"
        },
        "queue": stats,
        "limits": {
            "max_upload_size": config.server.max_upload_size,
            "max_attempts": config.worker.max_attempts(),
            "retry_delay_secs": config.worker.retry_delay_secs,
            "result_ttl_secs": config.broker.result_ttl_secs
        }
    })))
}
