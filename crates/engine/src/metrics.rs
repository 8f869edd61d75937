//! Metrics snapshot for the dashboard.
//!
//! Built on demand from the progress tracker and run counters and
//! serialized as JSON by the metrics server.

use crate::progress::ProgressTracker;
use crate::stats::RunStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Progress of one in-flight transcode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobGauge {
    pub path: String,
    pub percentage: f64,
    pub elapsed_secs: u64,
    /// Absent until the first non-zero progress sample
    pub remaining_secs: Option<u64>,
}

/// Complete snapshot of a running batch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobGauge>,
    pub queue_size: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub space_saved_bytes: i64,
    pub total_transcode_secs: u64,
}

/// Live state the snapshot is read from
#[derive(Clone)]
pub struct MetricsSource {
    pub tracker: Arc<ProgressTracker>,
    pub stats: Arc<RunStats>,
}

impl MetricsSource {
    pub fn new(tracker: Arc<ProgressTracker>, stats: Arc<RunStats>) -> Self {
        Self { tracker, stats }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats.snapshot();
        let jobs = self
            .tracker
            .snapshot()
            .into_iter()
            .map(|(path, p)| JobGauge {
                path,
                percentage: p.percentage,
                elapsed_secs: p.elapsed.as_secs(),
                remaining_secs: p.remaining.map(|r| r.as_secs()),
            })
            .collect();

        MetricsSnapshot {
            timestamp_unix_ms: now_unix_ms(),
            jobs,
            queue_size: stats.queue_size,
            completed_jobs: stats.completed,
            failed_jobs: stats.failed,
            space_saved_bytes: stats.space_saved_bytes,
            total_transcode_secs: stats.total_transcode_secs,
        }
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
