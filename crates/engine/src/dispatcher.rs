//! Distributed dispatch across a fixed roster of remote workers.
//!
//! Each worker owns `capacity` credits. A credit is taken when a job is
//! submitted and returned either when the worker's completion callback
//! arrives or at once if the submission fails. The dispatch loop waits on a
//! semaphore whose permits mirror the total idle credits, so it sleeps
//! instead of polling when every worker is busy.
//!
//! The run is complete when the outstanding-job counter reaches zero, which
//! only the callback endpoint and failed submissions decrement.

use crate::callback_server::{callback_router, CallbackState};
use crate::metrics_server::{bind, ServerError};
use crate::notify::Notifier;
use crate::record::VideoRecord;
use crate::remote::RemoteJobRequest;
use crate::stats::{RunStats, StatsSnapshot};
use crate::store::VideoStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Semaphore};
use tracing::{error, info, warn};
use vidbatch_config::{Config, ConfigError, WorkerConfig};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Callback listener failed: {0}")]
    Server(#[from] ServerError),

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("No worker credit available despite an admission permit")]
    NoCredit,
}

/// A named remote worker and its idle credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlot {
    pub name: String,
    pub addr: String,
    pub capacity: u32,
    /// Idle credits, always in `[0, capacity]`
    pub available: u32,
}

/// A credit taken from one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLease {
    pub name: String,
    pub addr: String,
}

/// Credit pools for the whole roster.
#[derive(Debug)]
pub struct WorkerPool {
    slots: Mutex<Vec<WorkerSlot>>,
    /// One permit per idle credit across all slots
    ready: Semaphore,
}

impl WorkerPool {
    pub fn new(workers: &[WorkerConfig]) -> Self {
        let slots: Vec<WorkerSlot> = workers
            .iter()
            .map(|w| WorkerSlot {
                name: w.name.clone(),
                addr: w.addr.clone(),
                capacity: w.capacity,
                available: w.capacity,
            })
            .collect();
        let total: u32 = slots.iter().map(|s| s.available).sum();
        Self {
            slots: Mutex::new(slots),
            ready: Semaphore::new(total as usize),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<WorkerSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until any worker has an idle credit and take it. Workers are
    /// tried in roster order.
    pub async fn acquire(&self) -> Result<WorkerLease, DispatchError> {
        self.ready
            .acquire()
            .await
            .map_err(|_| DispatchError::PoolClosed)?
            .forget();

        let mut slots = self.lock();
        match slots.iter_mut().find(|s| s.available > 0) {
            Some(slot) => {
                slot.available -= 1;
                Ok(WorkerLease {
                    name: slot.name.clone(),
                    addr: slot.addr.clone(),
                })
            }
            None => {
                drop(slots);
                self.ready.add_permits(1);
                Err(DispatchError::NoCredit)
            }
        }
    }

    /// Return one credit to `name`. Unknown names and slots already at
    /// capacity are left unchanged and yield `false`.
    pub fn release(&self, name: &str) -> bool {
        let returned = {
            let mut slots = self.lock();
            match slots.iter_mut().find(|s| s.name == name) {
                Some(slot) if slot.available < slot.capacity => {
                    slot.available += 1;
                    true
                }
                _ => false,
            }
        };
        if returned {
            self.ready.add_permits(1);
        }
        returned
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|s| s.name == name)
    }

    pub fn available(&self, name: &str) -> Option<u32> {
        self.lock()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.available)
    }

    pub fn slots(&self) -> Vec<WorkerSlot> {
        self.lock().clone()
    }

    /// Stop the pool; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.ready.close();
    }
}

/// Jobs submitted and not yet accounted for, keyed by worker and source
/// path. Only a callback that removes an entry may count toward completion.
#[derive(Debug, Default)]
pub struct InFlight {
    jobs: Mutex<HashSet<(String, PathBuf)>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<(String, PathBuf)>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, worker: &str, path: &Path) {
        self.lock().insert((worker.to_string(), path.to_path_buf()));
    }

    /// Remove the job; `false` if it was not in flight on `worker`.
    pub fn take(&self, worker: &str, path: &Path) -> bool {
        self.lock().remove(&(worker.to_string(), path.to_path_buf()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// HTTP client for dispatcher/worker traffic. Workers sit on the local
/// network, so system proxy settings are ignored.
pub fn cluster_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_default()
}

/// Decrement the outstanding-job counter, never below zero.
pub fn decrement_outstanding(outstanding: &watch::Sender<usize>) -> usize {
    let mut left = 0;
    outstanding.send_modify(|n| {
        *n = n.saturating_sub(1);
        left = *n;
    });
    left
}

/// One distributed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub selection: Vec<VideoRecord>,
    /// Output size, `WxH`
    pub resolution: String,
    pub bitrate_kbps: u32,
    pub auto_delete: bool,
}

/// Drives a distributed batch.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    client: reqwest::Client,
    callback_bind: String,
    callback_url: String,
    store: Arc<dyn VideoStore>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<RunStats>,
}

impl Dispatcher {
    /// Build from validated dispatch configuration.
    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn VideoStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DispatchError> {
        cfg.validate_dispatch()?;
        let callback_url = cfg.dispatch.callback_url.clone().unwrap_or_default();
        Ok(Self {
            pool: Arc::new(WorkerPool::new(&cfg.dispatch.workers)),
            client: cluster_client(),
            callback_bind: cfg.dispatch.callback_bind.clone(),
            callback_url,
            store,
            notifier,
            stats: Arc::new(RunStats::new(0)),
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Counters for every batch run through this dispatcher.
    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// Bind the callback listener, then run the batch on it.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<StatsSnapshot, DispatchError> {
        let listener = bind(&self.callback_bind).await?;
        self.dispatch_on(listener, request).await
    }

    /// Run the batch with callbacks served on `listener`.
    ///
    /// Returns once every job has been accounted for by a callback or a
    /// failed submission.
    pub async fn dispatch_on(
        &self,
        listener: TcpListener,
        request: &DispatchRequest,
    ) -> Result<StatsSnapshot, DispatchError> {
        let total = request.selection.len();
        let stats = self.stats.clone();
        stats.add_queued(total as u64);
        if total == 0 {
            return Ok(stats.snapshot());
        }

        let (outstanding_tx, mut outstanding_rx) = watch::channel(total);
        let outstanding = Arc::new(outstanding_tx);
        let sources: HashMap<_, _> = request
            .selection
            .iter()
            .map(|r| (r.path.clone(), r.clone()))
            .collect();

        let in_flight = Arc::new(InFlight::new());
        let state = CallbackState {
            pool: self.pool.clone(),
            in_flight: in_flight.clone(),
            outstanding: outstanding.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            stats: stats.clone(),
            sources: Arc::new(sources),
            auto_delete: request.auto_delete,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(state);
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(
            jobs = total,
            workers = self.pool.slots().len(),
            callback_url = %self.callback_url,
            "Starting distributed batch"
        );
        self.notifier
            .notify(&format!("Starting transcoding of {} videos", total))
            .await;

        let mut loop_result = Ok(());
        for record in &request.selection {
            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    loop_result = Err(e);
                    break;
                }
            };
            in_flight.insert(&lease.name, &record.path);
            let job = RemoteJobRequest {
                worker: lease.name.clone(),
                record: record.clone(),
                resolution: request.resolution.clone(),
                bitrate_kbps: request.bitrate_kbps,
                auto_delete: request.auto_delete,
                callback_url: self.callback_url.clone(),
            };
            tokio::spawn(submit(
                self.client.clone(),
                lease,
                job,
                self.pool.clone(),
                in_flight.clone(),
                outstanding.clone(),
                stats.clone(),
                self.notifier.clone(),
            ));
        }

        if loop_result.is_ok() {
            // The sender lives in `outstanding` for the whole wait.
            let _ = outstanding_rx.wait_for(|n| *n == 0).await;
        }

        let _ = shutdown_tx.send(());
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Callback listener stopped with error"),
            Err(e) => warn!(error = %e, "Callback listener task failed"),
        }
        loop_result?;

        let summary = stats.snapshot();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            space_saved_bytes = summary.space_saved_bytes,
            "Distributed batch finished"
        );
        Ok(summary)
    }
}

/// POST one job to its worker. On any failure the credit goes straight
/// back and the job is counted as failed.
#[allow(clippy::too_many_arguments)]
async fn submit(
    client: reqwest::Client,
    lease: WorkerLease,
    job: RemoteJobRequest,
    pool: Arc<WorkerPool>,
    in_flight: Arc<InFlight>,
    outstanding: Arc<watch::Sender<usize>>,
    stats: Arc<RunStats>,
    notifier: Arc<dyn Notifier>,
) {
    let url = format!("http://{}/transcode", lease.addr);
    let sent = client
        .post(&url)
        .json(&job)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match sent {
        Ok(_) => {
            info!(worker = %lease.name, path = %job.record.path.display(), "Job submitted");
        }
        Err(e) => {
            error!(
                worker = %lease.name,
                path = %job.record.path.display(),
                error = %e,
                "Failed to submit job"
            );
            // A callback may already have settled this job.
            if !in_flight.take(&lease.name, &job.record.path) {
                return;
            }
            pool.release(&lease.name);
            stats.record_failure();
            decrement_outstanding(&outstanding);
            notifier
                .notify(&format!(
                    "Error sending {} to {}: {}",
                    job.record.path.display(),
                    lease.name,
                    e
                ))
                .await;
        }
    }
}
