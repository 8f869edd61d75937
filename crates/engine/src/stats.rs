//! Batch counters shared by every job in a run.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Jobs in the batch
    pub queue_size: u64,
    pub completed: u64,
    pub failed: u64,
    /// Sum of `old - new` over completed jobs; negative if outputs grew
    pub space_saved_bytes: i64,
    pub total_transcode_secs: u64,
}

impl StatsSnapshot {
    /// Jobs not yet finished either way.
    pub fn remaining(&self) -> u64 {
        self.queue_size
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }
}

/// Mutex-guarded run counters.
#[derive(Debug, Default)]
pub struct RunStats {
    inner: Mutex<StatsSnapshot>,
}

impl RunStats {
    pub fn new(queue_size: u64) -> Self {
        Self {
            inner: Mutex::new(StatsSnapshot {
                queue_size,
                ..StatsSnapshot::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_queued(&self, n: u64) {
        self.lock().queue_size += n;
    }

    /// Count a completed job and return the running space-saved total.
    pub fn record_success(&self, space_saved: i64, seconds_taken: u64) -> i64 {
        let mut s = self.lock();
        s.completed += 1;
        s.space_saved_bytes += space_saved;
        s.total_transcode_secs += seconds_taken;
        s.space_saved_bytes
    }

    pub fn record_failure(&self) {
        self.lock().failed += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_running_total_includes_negative_savings() {
        let stats = RunStats::new(3);
        assert_eq!(stats.record_success(800, 10), 800);
        assert_eq!(stats.record_success(-300, 5), 500);
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.space_saved_bytes, 500);
        assert_eq!(snap.total_transcode_secs, 15);
        assert_eq!(snap.remaining(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(RunStats::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.record_success(1, 1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.completed, 1600);
        assert_eq!(snap.space_saved_bytes, 1600);
    }
}
