//! Progress tracking for in-flight transcodes.
//!
//! The encoder reports its position as `out_time=HH:MM:SS.micro` lines. Each
//! line is turned into a percentage of the source duration plus an estimate
//! of remaining time and stored in a [`ProgressTracker`] keyed by source
//! path. A display loop reads the tracker on a fixed interval.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Latest progress sample for one job.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JobProgress {
    /// Completion in `[0, 100]`
    pub percentage: f64,
    pub elapsed: Duration,
    /// `None` until the first non-zero sample
    pub remaining: Option<Duration>,
}

impl JobProgress {
    /// Derive a sample from the encoder position.
    ///
    /// A non-positive total duration yields 0% with no estimate, as does
    /// a sample so small that the estimate does not fit a `Duration`.
    pub fn compute(media_secs: f64, total_secs: f64, elapsed: Duration) -> Self {
        if total_secs <= 0.0 || !total_secs.is_finite() {
            return Self {
                percentage: 0.0,
                elapsed,
                remaining: None,
            };
        }

        let percentage = (media_secs / total_secs * 100.0).clamp(0.0, 100.0);
        let remaining = if percentage > 0.0 {
            let total_estimate = elapsed.as_secs_f64() * 100.0 / percentage;
            Duration::try_from_secs_f64((total_estimate - elapsed.as_secs_f64()).max(0.0)).ok()
        } else {
            None
        };

        Self {
            percentage,
            elapsed,
            remaining,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    jobs: HashMap<String, JobProgress>,
    /// Keys in start order
    order: Vec<String>,
}

/// Concurrent map from job key to its latest progress.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<TrackerInner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `key` at 0%. A key already being tracked is left as is.
    pub fn start_tracking(&self, key: &str) {
        let mut inner = self.lock();
        if inner.jobs.contains_key(key) {
            return;
        }
        inner.jobs.insert(key.to_string(), JobProgress::default());
        inner.order.push(key.to_string());
    }

    /// Replace the sample for `key`. Ignored for keys not being tracked.
    pub fn update(&self, key: &str, progress: JobProgress) {
        let mut inner = self.lock();
        if let Some(slot) = inner.jobs.get_mut(key) {
            *slot = progress;
        }
    }

    pub fn stop_tracking(&self, key: &str) {
        let mut inner = self.lock();
        if inner.jobs.remove(key).is_some() {
            inner.order.retain(|k| k != key);
        }
    }

    pub fn get(&self, key: &str) -> Option<JobProgress> {
        self.lock().jobs.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Consistent copy of every tracked job in start order.
    pub fn snapshot(&self) -> Vec<(String, JobProgress)> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|k| inner.jobs.get(k).map(|p| (k.clone(), *p)))
            .collect()
    }
}

fn out_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"out_time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("static regex is valid")
    })
}

/// Extract the media position in seconds from an encoder progress line.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let caps = out_time_regex().captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Consume encoder output lines for `key` until the sender closes.
///
/// Lines without a position are ignored. Tracking is not stopped here;
/// the caller does that once the encoder process has exited.
pub async fn track_progress_stream(
    tracker: Arc<ProgressTracker>,
    key: String,
    total_secs: f64,
    started: Instant,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        if let Some(media_secs) = parse_out_time(&line) {
            tracker.update(
                &key,
                JobProgress::compute(media_secs, total_secs, started.elapsed()),
            );
        }
    }
}

/// Where the periodic progress report goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySink {
    /// Redraw on stdout (interactive runs)
    Console,
    /// One log event per job (background runs)
    Log,
}

/// `HH:MM:SS`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// One report line for a job.
pub fn format_progress_line(key: &str, p: &JobProgress) -> String {
    let remaining = p
        .remaining
        .map(format_duration)
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{}: {:.2}% | elapsed {} | remaining {}",
        key,
        p.percentage,
        format_duration(p.elapsed),
        remaining
    )
}

/// Render the tracker every `interval` until the handle is aborted.
pub fn spawn_display_loop(
    tracker: Arc<ProgressTracker>,
    sink: DisplaySink,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot = tracker.snapshot();
            match sink {
                DisplaySink::Console => {
                    if snapshot.is_empty() {
                        continue;
                    }
                    // Clear screen and home the cursor.
                    print!("\x1b[2J\x1b[H");
                    println!("Transcoding progress:");
                    for (key, progress) in &snapshot {
                        println!("{}", format_progress_line(key, progress));
                    }
                }
                DisplaySink::Log => {
                    for (key, progress) in &snapshot {
                        info!(
                            path = %key,
                            percentage = progress.percentage,
                            elapsed_secs = progress.elapsed.as_secs(),
                            remaining_secs = progress.remaining.map(|r| r.as_secs()),
                            "Transcode progress"
                        );
                    }
                }
            }
        }
    })
}
