//! Job status endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{AnalysisReport, JobRecord, JobState, ProgressMeta};

/// Status body; which fields are present depends on the state
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ProgressMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    /// Also used for ids that were never seen or have expired
    fn pending(job_id: String) -> Self {
        Self {
            job_id,
            status: JobState::Pending,
            message: Some("Waiting in queue..."),
            meta: None,
            attempt: None,
            result: None,
            error: None,
        }
    }

    fn from_record(job_id: String, record: JobRecord) -> Self {
        match record.state {
            JobState::Pending => Self::pending(job_id),
            JobState::Started => Self {
                message: Some("Analysis in progress..."),
                status: JobState::Started,
                meta: record.meta,
                attempt: Some(record.attempt_count),
                ..Self::pending(job_id)
            },
            JobState::Success => Self {
                message: None,
                status: JobState::Success,
                result: record.result,
                ..Self::pending(job_id)
            },
            JobState::Failure => Self {
                message: None,
                status: JobState::Failure,
                error: record.error,
                ..Self::pending(job_id)
            },
        }
    }
}

/// Get the current state of a job
///
/// Answers 200 for every id, known or not. The one exception is a result
/// backend that cannot be read: that is a 500 `broker_error`, because
/// reporting PENDING would hide a finished job from its poller.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let Ok(id) = job_id.parse::<Uuid>() else {
        tracing::debug!("Status requested for non-UUID id '{}'", job_id);
        return Ok(Json(StatusResponse::pending(job_id)));
    };

    let response = match state.broker().lookup(id).await? {
        Some(record) => StatusResponse::from_record(job_id, record),
        None => StatusResponse::pending(job_id),
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::config::AnalyzerConfig;
    use crate::processing::test_support::UnreadableBroker;
    use crate::processing::Broker;
    use crate::server::state::AppState;
    use crate::server::{build_router, test_support};
    use crate::storage::{DocumentStore, LocalDocumentStore};
    use std::sync::Arc;
    use crate::types::{AnalysisReport, DocumentRef, JobMessage, ProgressMeta, StateUpdate};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn status(app: &test_support::TestApp, job_id: &str) -> Value {
        let response = build_router(app.state.clone())
            .oneshot(
                Request::get(format!("/status/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        test_support::json_body(response).await
    }

    async fn enqueue(app: &test_support::TestApp) -> Uuid {
        let job_id = Uuid::new_v4();
        let message = JobMessage::new(
            job_id,
            "Summarize".to_string(),
            DocumentRef::new(format!("financial_document_{}.pdf", job_id)),
            "q3.pdf".to_string(),
        );
        app.broker.enqueue(message).await.unwrap()
    }

    fn started(attempt: u32) -> StateUpdate {
        StateUpdate::Started {
            attempt,
            meta: ProgressMeta::new("Analysis pipeline started", "financial_document_x.pdf"),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_look_pending() {
        let app = test_support::app();

        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let body = status(&app, &id).await;
            assert_eq!(body["job_id"], id.as_str());
            assert_eq!(body["status"], "PENDING");
            assert_eq!(body["message"], "Waiting in queue...");
        }
    }

    #[tokio::test]
    async fn test_lifecycle_as_seen_by_pollers() {
        let app = test_support::app();
        let job_id = enqueue(&app).await;
        let id = job_id.to_string();

        let body = status(&app, &id).await;
        assert_eq!(body["status"], "PENDING");

        app.broker.report(job_id, started(1)).await.unwrap();
        let body = status(&app, &id).await;
        assert_eq!(body["status"], "STARTED");
        assert_eq!(body["message"], "Analysis in progress...");
        assert_eq!(body["meta"]["message"], "Analysis pipeline started");
        assert_eq!(body["meta"]["file"], "financial_document_x.pdf");
        assert_eq!(body["attempt"], 1);

        app.broker.report(job_id, started(2)).await.unwrap();
        assert_eq!(status(&app, &id).await["attempt"], 2);

        app.broker
            .report(
                job_id,
                StateUpdate::Succeeded(AnalysisReport::new("Summarize", "Margins expanded")),
            )
            .await
            .unwrap();
        let body = status(&app, &id).await;
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(body["result"]["status"], "success");
        assert_eq!(body["result"]["analysis"], "Margins expanded");
        assert!(body.get("error").is_none());

        // Polling a finished job is stable
        assert_eq!(status(&app, &id).await, body);
    }

    #[tokio::test]
    async fn test_unreadable_backend_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(LocalDocumentStore::new(dir.path()));
        let state = AppState::new(
            AnalyzerConfig::default(),
            Arc::new(UnreadableBroker::new()),
            store,
        );

        let response = build_router(state)
            .oneshot(
                Request::get(format!("/status/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = test_support::json_body(response).await;
        assert_eq!(body["error"]["type"], "broker_error");
    }

    #[tokio::test]
    async fn test_failure_carries_error() {
        let app = test_support::app();
        let job_id = enqueue(&app).await;
        app.broker.report(job_id, started(1)).await.unwrap();
        app.broker
            .report(job_id, StateUpdate::Failed { error: "Unreadable PDF".to_string() })
            .await
            .unwrap();

        let body = status(&app, &job_id.to_string()).await;
        assert_eq!(body["status"], "FAILURE");
        assert_eq!(body["error"], "Unreadable PDF");
        assert!(body.get("result").is_none());
    }
}
