//! Document submission endpoint

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{normalize_query, JobMessage};

/// Response for an accepted submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    /// Always "QUEUED"
    pub status: &'static str,
    pub message: &'static str,
    /// Client-supplied file name
    pub file_received: String,
}

/// An uploaded `file` field
struct Upload {
    filename: String,
    data: Bytes,
}

/// Upload a document and queue it for analysis
///
/// Fields may arrive in any order; unknown fields are ignored.
pub async fn analyze_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>> {
    let limit = state.config().server.max_upload_size;
    let mut upload: Option<Upload> = None;
    let mut query: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                upload = Some(Upload { filename, data });
            }
            "query" => {
                query = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let upload = upload.ok_or_else(|| Error::invalid_request("Missing 'file' field"))?;
    if upload.data.is_empty() {
        return Err(Error::EmptyUpload);
    }
    let query = normalize_query(query.as_deref());

    let job_id = Uuid::new_v4();
    let documents = state.documents();
    let document = documents.store(&job_id, &upload.filename, &upload.data).await?;

    let message = JobMessage::new(job_id, query, document.clone(), upload.filename.clone());
    if let Err(e) = state.broker().enqueue(message).await {
        // Nothing will ever consume the stored copy
        if let Err(cleanup) = documents.delete(&document).await {
            tracing::warn!("Failed to remove {} after enqueue error: {}", document, cleanup);
        }
        return Err(e);
    }

    tracing::info!(
        "Queued job {} for '{}' ({} bytes)",
        job_id,
        upload.filename,
        upload.data.len()
    );

    Ok(Json(SubmitResponse {
        job_id,
        status: "QUEUED",
        message: "Document queued for analysis.",
        file_received: upload.filename,
    }))
}

fn multipart_error(err: MultipartError, limit: usize) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::UploadTooLarge(limit)
    } else {
        Error::invalid_request(format!("Failed to read multipart field: {}", err))
    }
}
