//! Completion callback endpoint for distributed batches.
//!
//! Workers POST a [`CallbackPayload`] to `/callback` when a job ends. A
//! callback settles the job only if that worker has that source in flight;
//! it then records the outcome, returns the worker's credit and decrements
//! the outstanding-job counter. Anything else is acknowledged with
//! `accepted: false` and changes nothing. The answer is always 200.

use crate::dispatcher::{decrement_outstanding, InFlight, WorkerPool};
use crate::job_executor::{persist_result, remove_row};
use crate::notify::Notifier;
use crate::record::{bytes_to_gib, VideoRecord};
use crate::remote::{CallbackAck, CallbackPayload, JobOutcome};
use crate::stats::RunStats;
use crate::store::VideoStore;
use axum::{extract::State, routing::post, Json, Router};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shared state behind the callback route.
#[derive(Clone)]
pub struct CallbackState {
    pub pool: Arc<WorkerPool>,
    pub in_flight: Arc<InFlight>,
    pub outstanding: Arc<watch::Sender<usize>>,
    pub store: Arc<dyn VideoStore>,
    pub notifier: Arc<dyn Notifier>,
    pub stats: Arc<RunStats>,
    /// Selected records by path, for registering outputs
    pub sources: Arc<HashMap<PathBuf, VideoRecord>>,
    pub auto_delete: bool,
}

pub fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/callback", post(handle_callback))
        .with_state(state)
}

/// Handler for POST /callback
async fn handle_callback(
    State(state): State<CallbackState>,
    Json(payload): Json<CallbackPayload>,
) -> Json<CallbackAck> {
    if !state.pool.contains(&payload.worker) {
        warn!(worker = %payload.worker, "Callback from unknown worker ignored");
        return rejected(&state);
    }
    let source_path = match &payload.outcome {
        JobOutcome::Success { result } => &result.original_path,
        JobOutcome::Failed { source_path, .. } => source_path,
    };
    if !state.in_flight.take(&payload.worker, source_path) {
        warn!(
            worker = %payload.worker,
            path = %source_path.display(),
            "Callback for a job not in flight ignored"
        );
        return rejected(&state);
    }

    let message = match &payload.outcome {
        JobOutcome::Success { result } => {
            let saved = result.space_saved();
            let total = state.stats.record_success(saved, result.seconds_taken);

            let source = state
                .sources
                .get(&result.original_path)
                .cloned()
                .unwrap_or_else(|| VideoRecord::from_path(result.original_path.clone()));
            persist_result(&state.store, &source, result).await;
            if state.auto_delete {
                remove_row(&state.store, &result.original_path).await;
            }

            info!(
                worker = %payload.worker,
                input = %result.original_path.display(),
                output = %result.output_path.display(),
                saved_gib = bytes_to_gib(saved),
                "Remote transcode completed"
            );
            format!(
                "{} finished {} -> {}\nSpace saved for this file: {:.2} GB\nTotal space saved so far: {:.2} GB",
                payload.worker,
                result.original_path.display(),
                result.output_path.display(),
                bytes_to_gib(saved),
                bytes_to_gib(total)
            )
        }
        JobOutcome::Failed { source_path, error } => {
            state.stats.record_failure();
            error!(
                worker = %payload.worker,
                path = %source_path.display(),
                error = %error,
                "Remote transcode failed"
            );
            format!(
                "{} failed {}: {}",
                payload.worker,
                source_path.display(),
                error
            )
        }
    };

    if !state.pool.release(&payload.worker) {
        warn!(worker = %payload.worker, "Worker had no credit out");
    }
    let outstanding = decrement_outstanding(&state.outstanding);
    state.notifier.notify(&message).await;

    Json(CallbackAck {
        accepted: true,
        outstanding,
    })
}

fn rejected(state: &CallbackState) -> Json<CallbackAck> {
    Json(CallbackAck {
        accepted: false,
        outstanding: *state.outstanding.borrow(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::record::TranscodeResult;
    use crate::store::JsonFileStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;
    use vidbatch_config::WorkerConfig;

    struct Fixture {
        _dir: TempDir,
        state: CallbackState,
        store: Arc<JsonFileStore>,
        rx: watch::Receiver<usize>,
    }

    async fn fixture(outstanding: usize, auto_delete: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("s.json")).unwrap());
        let source = VideoRecord::from_path("/lib/a 1080p.mkv");
        store.insert(source.clone()).unwrap();

        let pool = Arc::new(WorkerPool::new(&[WorkerConfig {
            name: "w1".to_string(),
            addr: "127.0.0.1:1".to_string(),
            capacity: 2,
        }]));
        // one job in flight on w1
        pool.acquire().await.unwrap();

        let in_flight = Arc::new(InFlight::new());
        in_flight.insert("w1", &source.path);

        let (tx, rx) = watch::channel(outstanding);
        let mut sources = HashMap::new();
        sources.insert(source.path.clone(), source);
        let state = CallbackState {
            pool,
            in_flight,
            outstanding: Arc::new(tx),
            store: store.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            stats: Arc::new(RunStats::new(outstanding as u64)),
            sources: Arc::new(sources),
            auto_delete,
        };
        Fixture {
            _dir: dir,
            state,
            store,
            rx,
        }
    }

    fn success(worker: &str) -> CallbackPayload {
        CallbackPayload {
            worker: worker.to_string(),
            outcome: JobOutcome::Success {
                result: TranscodeResult {
                    original_path: PathBuf::from("/lib/a 1080p.mkv"),
                    output_path: PathBuf::from("/lib/a vbcoded.mkv"),
                    old_extension: ".mkv".to_string(),
                    new_extension: ".mkv".to_string(),
                    old_size: 2_000_000_000,
                    new_size: 1_200_000_000,
                    old_resolution: "1920x1080".to_string(),
                    new_resolution: "1280x720".to_string(),
                    old_bitrate: 8_000_000,
                    new_bitrate_kbps: 2500,
                    seconds_taken: 600,
                },
            },
        }
    }

    async fn post_callback(state: CallbackState, payload: &CallbackPayload) -> (StatusCode, CallbackAck) {
        let response = callback_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_success_callback_persists_and_returns_credit() {
        let f = fixture(2, false).await;
        let (status, ack) = post_callback(f.state.clone(), &success("w1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, CallbackAck { accepted: true, outstanding: 1 });
        assert_eq!(*f.rx.borrow(), 1);
        assert_eq!(f.state.pool.available("w1"), Some(2));
        assert_eq!(f.state.stats.snapshot().space_saved_bytes, 800_000_000);
        assert_eq!(f.store.transcodes().unwrap().len(), 1);
        let output = f
            .store
            .lookup(std::path::Path::new("/lib/a vbcoded.mkv"))
            .unwrap()
            .unwrap();
        assert_eq!(output.size_bytes, 1_200_000_000);
        assert!(f.store.lookup(std::path::Path::new("/lib/a 1080p.mkv")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_delete_removes_source_row() {
        let f = fixture(1, true).await;
        post_callback(f.state.clone(), &success("w1")).await;
        assert!(f.store.lookup(std::path::Path::new("/lib/a 1080p.mkv")).unwrap().is_none());
        assert_eq!(*f.rx.borrow(), 0);
    }

    #[tokio::test]
    async fn test_failed_callback_counts_failure() {
        let f = fixture(1, false).await;
        let payload = CallbackPayload {
            worker: "w1".to_string(),
            outcome: JobOutcome::Failed {
                source_path: PathBuf::from("/lib/a 1080p.mkv"),
                error: "Encoder failed with exit code: 1".to_string(),
            },
        };
        let (status, ack) = post_callback(f.state.clone(), &payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack.outstanding, 0);
        assert_eq!(f.state.stats.snapshot().failed, 1);
        assert_eq!(f.state.pool.available("w1"), Some(2));
        assert!(f.store.transcodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_worker_changes_nothing() {
        let f = fixture(3, false).await;
        let before = f.state.pool.slots();
        let (status, ack) = post_callback(f.state.clone(), &success("intruder")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, CallbackAck { accepted: false, outstanding: 3 });
        assert_eq!(f.state.pool.slots(), before);
        assert_eq!(*f.rx.borrow(), 3);
        assert!(f.store.transcodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_callback_does_not_finish_batch() {
        let mut f = fixture(2, false).await;
        let roster = [
            WorkerConfig {
                name: "w1".to_string(),
                addr: "127.0.0.1:1".to_string(),
                capacity: 1,
            },
            WorkerConfig {
                name: "w2".to_string(),
                addr: "127.0.0.1:2".to_string(),
                capacity: 1,
            },
        ];
        let pool = Arc::new(WorkerPool::new(&roster));
        assert_eq!(pool.acquire().await.unwrap().name, "w1");
        assert_eq!(pool.acquire().await.unwrap().name, "w2");
        f.state.pool = pool;
        f.state.in_flight.insert("w2", std::path::Path::new("/lib/b 1080p.mkv"));

        let (_, first) = post_callback(f.state.clone(), &success("w1")).await;
        let (status, second) = post_callback(f.state.clone(), &success("w1")).await;

        assert_eq!(first, CallbackAck { accepted: true, outstanding: 1 });
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second, CallbackAck { accepted: false, outstanding: 1 });
        assert_eq!(*f.rx.borrow(), 1);
        assert_eq!(f.state.pool.available("w2"), Some(0));
        assert_eq!(f.state.stats.snapshot().completed, 1);
        assert_eq!(f.store.transcodes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_for_other_source_is_rejected() {
        let f = fixture(2, false).await;
        let mut payload = success("w1");
        if let JobOutcome::Success { result } = &mut payload.outcome {
            result.original_path = PathBuf::from("/lib/never sent.mkv");
        }
        let (_, ack) = post_callback(f.state.clone(), &payload).await;

        assert_eq!(ack, CallbackAck { accepted: false, outstanding: 2 });
        assert_eq!(f.state.pool.available("w1"), Some(1));
        assert_eq!(f.state.stats.snapshot().completed, 0);
        assert!(f.store.transcodes().unwrap().is_empty());
    }
}
