//! Metrics HTTP server
//!
//! Serves the live [`MetricsSnapshot`] at `GET /metrics` for the dashboard.

use axum::{extract::State, routing::get, Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::{MetricsSnapshot, MetricsSource};

/// Errors from the HTTP listeners (metrics, callback, worker)
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Bind `addr`, mapping failure to [`ServerError::Bind`].
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Handler for GET /metrics
async fn get_metrics(State(source): State<MetricsSource>) -> Json<MetricsSnapshot> {
    Json(source.snapshot())
}

/// Creates the axum Router with the metrics endpoint
pub fn create_metrics_router(source: MetricsSource) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(source)
}

/// Bind `addr` and serve metrics in a background task.
///
/// Binding happens before returning so a port clash is reported to the
/// caller. The task runs until aborted.
pub async fn spawn_metrics_server(
    addr: &str,
    source: MetricsSource,
) -> Result<JoinHandle<()>, ServerError> {
    let listener = bind(addr).await?;
    info!(addr = %addr, "Metrics endpoint listening");
    let app = create_metrics_router(source);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Metrics server stopped");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressTracker;
    use crate::stats::RunStats;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn source() -> MetricsSource {
        MetricsSource::new(Arc::new(ProgressTracker::new()), Arc::new(RunStats::new(0)))
    }

    async fn fetch(app: Router) -> (StatusCode, String, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, body.to_vec())
    }

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let source = source();
        source.tracker.start_tracking("/media/video.mkv");
        source.stats.add_queued(5);
        source.stats.record_success(2048, 12);

        let (status, content_type, body) = fetch(create_metrics_router(source)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.contains("application/json"));
        let snapshot: MetricsSnapshot =
            serde_json::from_slice(&body).expect("should deserialize to MetricsSnapshot");
        assert_eq!(snapshot.queue_size, 5);
        assert_eq!(snapshot.completed_jobs, 1);
        assert_eq!(snapshot.space_saved_bytes, 2048);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].path, "/media/video.mkv");
    }

    #[tokio::test]
    async fn test_get_metrics_empty_snapshot() {
        let (status, _, body) = fetch(create_metrics_router(source())).await;
        assert_eq!(status, StatusCode::OK);
        let json_str = String::from_utf8(body).unwrap();
        for field in [
            "timestamp_unix_ms",
            "jobs",
            "queue_size",
            "completed_jobs",
            "failed_jobs",
            "space_saved_bytes",
            "total_transcode_secs",
        ] {
            assert!(json_str.contains(field), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn test_spawn_binds_ephemeral_port() {
        let handle = spawn_metrics_server("127.0.0.1:0", source()).await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap().to_string();
        let err = bind(&addr).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
