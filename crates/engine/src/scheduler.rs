//! Local batch scheduler.
//!
//! Jobs are admitted in selection order through a semaphore and run as
//! tasks in a `JoinSet`. [`LocalScheduler::run`] returns only after every
//! admitted job has finished.

use crate::job_executor::{JobExecutor, JobParams};
use crate::record::{TranscodeResult, VideoRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Everything needed to run (or resume) a local batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub selection: Vec<VideoRecord>,
    /// Output size, `WxH`
    pub output_resolution: String,
    pub bitrate_kbps: u32,
    /// 0 is treated as 1
    pub max_concurrent: u32,
    pub auto_delete: bool,
}

impl BatchRequest {
    pub fn job_params(&self) -> JobParams {
        JobParams {
            resolution: self.output_resolution.clone(),
            bitrate_kbps: self.bitrate_kbps,
            auto_delete: self.auto_delete,
        }
    }
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub space_saved_bytes: i64,
    /// Successful results in completion order
    pub results: Vec<TranscodeResult>,
}

impl RunSummary {
    /// Every job failed (an empty batch does not count).
    pub fn all_failed(&self) -> bool {
        self.completed == 0 && self.failed > 0
    }
}

/// Concurrency-bounded runner for a local batch
pub struct LocalScheduler {
    executor: Arc<JobExecutor>,
}

impl LocalScheduler {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    /// Run every record in `request` and wait for all of them.
    pub async fn run(&self, request: &BatchRequest) -> RunSummary {
        let permits = request.max_concurrent.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(permits));
        let params = Arc::new(request.job_params());
        let mut tasks = JoinSet::new();

        info!(
            jobs = request.selection.len(),
            max_concurrent = permits,
            resolution = %request.output_resolution,
            bitrate_kbps = request.bitrate_kbps,
            "Starting batch"
        );

        for record in request.selection.iter().cloned() {
            // The semaphore is never closed while this loop holds it.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            let params = params.clone();
            tasks.spawn(async move {
                let _permit = permit;
                executor.execute(&record, &params).await
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    summary.completed += 1;
                    summary.space_saved_bytes += result.space_saved();
                    summary.results.push(result);
                }
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!(error = %e, "Transcode task panicked");
                    self.executor.stats().record_failure();
                    summary.failed += 1;
                }
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            space_saved_bytes = summary.space_saved_bytes,
            "Batch finished"
        );
        summary
    }
}
