//! Remote worker HTTP server.
//!
//! `POST /transcode` accepts a [`RemoteJobRequest`], answers `202 Accepted`
//! and runs the job in the background through a [`JobExecutor`] built
//! without a store. The outcome goes back to the dispatcher as a
//! [`CallbackPayload`] on the request's callback URL.

use crate::job_executor::{JobExecutor, JobParams};
use crate::metrics_server::{bind, ServerError};
use crate::remote::{CallbackPayload, JobOutcome, RemoteJobRequest};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct WorkerState {
    /// This node's own name, for logs
    pub name: String,
    pub executor: Arc<JobExecutor>,
    pub client: reqwest::Client,
}

pub fn worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/transcode", post(handle_transcode))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the worker API on `addr` until the process exits.
pub async fn run_worker_server(addr: &str, state: WorkerState) -> Result<(), ServerError> {
    let listener = bind(addr).await?;
    info!(worker = %state.name, addr = %addr, "Worker listening");
    axum::serve(listener, worker_router(state)).await?;
    Ok(())
}

async fn handle_transcode(
    State(state): State<WorkerState>,
    Json(job): Json<RemoteJobRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if let Err(reason) = job.validate() {
        warn!(worker = %state.name, reason = %reason, "Rejected job");
        return Err((StatusCode::BAD_REQUEST, reason));
    }

    info!(
        worker = %state.name,
        path = %job.record.path.display(),
        resolution = %job.resolution,
        "Job accepted"
    );
    tokio::spawn(run_job(state, job));
    Ok(StatusCode::ACCEPTED)
}

async fn run_job(state: WorkerState, job: RemoteJobRequest) {
    let params = JobParams {
        resolution: job.resolution.clone(),
        bitrate_kbps: job.bitrate_kbps,
        auto_delete: job.auto_delete,
    };
    let outcome = match state.executor.execute(&job.record, &params).await {
        Ok(result) => JobOutcome::Success { result },
        Err(e) => JobOutcome::Failed {
            source_path: job.record.path.clone(),
            error: e.to_string(),
        },
    };
    let payload = CallbackPayload {
        worker: job.worker.clone(),
        outcome,
    };

    let sent = state
        .client
        .post(&job.callback_url)
        .json(&payload)
        .send()
        .await
        .and_then(|r| r.error_for_status());
    if let Err(e) = sent {
        error!(
            worker = %state.name,
            callback_url = %job.callback_url,
            error = %e,
            "Failed to deliver callback"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::cluster_client;
    use crate::encode::testing::FakeEncoder;
    use crate::hardware::HardwareAccel;
    use crate::notify::RecordingNotifier;
    use crate::progress::ProgressTracker;
    use crate::record::VideoRecord;
    use crate::stats::RunStats;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn state(encoder: FakeEncoder) -> WorkerState {
        WorkerState {
            name: "node-a".to_string(),
            executor: Arc::new(JobExecutor::new(
                Arc::new(ProgressTracker::new()),
                Arc::new(encoder),
                HardwareAccel::Software,
                None,
                Arc::new(RecordingNotifier::default()),
                Arc::new(RunStats::new(0)),
            )),
            client: cluster_client(),
        }
    }

    /// Listener that forwards every callback body to a channel.
    async fn spawn_callback_sink() -> (String, mpsc::UnboundedReceiver<CallbackPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx = Arc::new(Mutex::new(tx));
        let app = Router::new().route(
            "/callback",
            post(move |Json(payload): Json<CallbackPayload>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.lock().unwrap().send(payload);
                    StatusCode::OK
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/callback", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });
        (url, rx)
    }

    fn job(record: VideoRecord, callback_url: &str) -> RemoteJobRequest {
        RemoteJobRequest {
            worker: "gpu-1".to_string(),
            record,
            resolution: "1280x720".to_string(),
            bitrate_kbps: 2000,
            auto_delete: false,
            callback_url: callback_url.to_string(),
        }
    }

    async fn post_job(app: Router, job: &RemoteJobRequest) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/transcode")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(job).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_accepted_job_reports_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Heat 1080p.mkv");
        std::fs::write(&path, vec![0u8; 300]).unwrap();
        let record = VideoRecord::from_path(&path);
        let (url, mut rx) = spawn_callback_sink().await;

        let status = post_job(worker_router(state(FakeEncoder::new(100))), &job(record, &url)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.worker, "gpu-1");
        match payload.outcome {
            JobOutcome::Success { result } => {
                assert_eq!(result.original_path, path);
                assert_eq!(result.space_saved(), 200);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_source_reports_failure() {
        let (url, mut rx) = spawn_callback_sink().await;
        let record = VideoRecord::from_path("/nonexistent/dir/a.mkv");

        let status = post_job(worker_router(state(FakeEncoder::new(1))), &job(record, &url)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match payload.outcome {
            JobOutcome::Failed { source_path, error } => {
                assert_eq!(source_path, std::path::PathBuf::from("/nonexistent/dir/a.mkv"));
                assert!(error.contains("Error getting file size"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_job_is_bad_request() {
        let mut bad = job(VideoRecord::from_path("/lib/a.mkv"), "http://127.0.0.1:1/callback");
        bad.bitrate_kbps = 0;
        let status = post_job(worker_router(state(FakeEncoder::new(1))), &bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let response = worker_router(state(FakeEncoder::new(1)))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
