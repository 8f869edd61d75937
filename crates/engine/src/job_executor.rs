//! Job executor
//!
//! Runs one transcode end to end: size the source, run the encoder while
//! its progress lines feed the tracker, size the output, record the result
//! and notify. A failure aborts that job only; callers keep going with the
//! rest of the batch.

use crate::encode::{EncodeError, EncodeParams, Encoder};
use crate::hardware::HardwareAccel;
use crate::notify::Notifier;
use crate::progress::{track_progress_stream, ProgressTracker};
use crate::record::{bytes_to_gib, space_saved, TranscodeResult, VideoRecord};
use crate::rename::output_path_for;
use crate::stats::RunStats;
use crate::store::{run_blocking, VideoStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Error type for job execution
#[derive(Debug, Error)]
pub enum JobError {
    /// Source file could not be sized
    #[error("Error getting file size for {path}: {source}")]
    SourceSize {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Encoder failed to start or exited unsuccessfully
    #[error("Error during transcoding of {path}: {source}")]
    Encode { path: PathBuf, source: EncodeError },

    /// Output file missing after a successful encode
    #[error("Error getting file size for {path}: {source}")]
    OutputSize {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Per-batch transcode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    /// Output size, `WxH`
    pub resolution: String,
    pub bitrate_kbps: u32,
    /// Delete the source file (and its store row) after success
    pub auto_delete: bool,
}

/// Executes transcodes against shared tracker, stats and collaborators.
pub struct JobExecutor {
    tracker: Arc<ProgressTracker>,
    encoder: Arc<dyn Encoder>,
    hardware: HardwareAccel,
    /// `None` on remote workers, where the dispatcher owns persistence
    store: Option<Arc<dyn VideoStore>>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<RunStats>,
}

impl JobExecutor {
    pub fn new(
        tracker: Arc<ProgressTracker>,
        encoder: Arc<dyn Encoder>,
        hardware: HardwareAccel,
        store: Option<Arc<dyn VideoStore>>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            tracker,
            encoder,
            hardware,
            store,
            notifier,
            stats,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// Run one job. Failures are logged, notified and counted before being
    /// returned.
    pub async fn execute(
        &self,
        record: &VideoRecord,
        params: &JobParams,
    ) -> Result<TranscodeResult, JobError> {
        info!(path = %record.path.display(), "Starting transcode");
        match self.transcode(record, params).await {
            Ok(result) => {
                self.finish(record, params, &result).await;
                Ok(result)
            }
            Err(e) => {
                error!(path = %record.path.display(), error = %e, "Transcode failed");
                self.stats.record_failure();
                self.notifier.notify(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn transcode(
        &self,
        record: &VideoRecord,
        params: &JobParams,
    ) -> Result<TranscodeResult, JobError> {
        let old_size = file_size(&record.path)
            .await
            .map_err(|source| JobError::SourceSize {
                path: record.path.clone(),
                source,
            })?;

        let output_path = output_path_for(record);
        let encode_params = EncodeParams {
            input_path: record.path.clone(),
            output_path: output_path.clone(),
            resolution: params.resolution.clone(),
            bitrate_kbps: params.bitrate_kbps,
            hardware: self.hardware,
        };
        info!(
            input = %record.path.display(),
            output = %output_path.display(),
            encoder = self.hardware.encoder(),
            "Transcoding"
        );

        let key = record.path.to_string_lossy().into_owned();
        self.tracker.start_tracking(&key);

        let started = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let parser = tokio::spawn(track_progress_stream(
            self.tracker.clone(),
            key.clone(),
            record.duration_secs,
            started,
            rx,
        ));

        let encoded = self.encoder.encode(&encode_params, tx).await;
        // The encoder drops its sender on exit, so the parser drains and ends.
        let _ = parser.await;
        let seconds_taken = started.elapsed().as_secs();
        self.tracker.stop_tracking(&key);

        encoded.map_err(|source| JobError::Encode {
            path: record.path.clone(),
            source,
        })?;

        let new_size = file_size(&output_path)
            .await
            .map_err(|source| JobError::OutputSize {
                path: output_path.clone(),
                source,
            })?;

        Ok(TranscodeResult {
            original_path: record.path.clone(),
            old_extension: record.extension.clone(),
            new_extension: crate::record::extension_of(&output_path),
            output_path,
            old_size,
            new_size,
            old_resolution: record.resolution(),
            new_resolution: params.resolution.clone(),
            old_bitrate: record.bitrate,
            new_bitrate_kbps: params.bitrate_kbps,
            seconds_taken,
        })
    }

    async fn finish(&self, record: &VideoRecord, params: &JobParams, result: &TranscodeResult) {
        let saved = space_saved(result.old_size, result.new_size);
        let total_saved = self.stats.record_success(saved, result.seconds_taken);

        if let Some(store) = &self.store {
            persist_result(store, record, result).await;
        }

        if params.auto_delete {
            match tokio::fs::remove_file(&record.path).await {
                Ok(()) => {
                    info!(path = %record.path.display(), "Original deleted");
                    if let Some(store) = &self.store {
                        remove_row(store, &record.path).await;
                    }
                }
                Err(e) => {
                    warn!(path = %record.path.display(), error = %e, "Error deleting original");
                }
            }
        }

        info!(
            input = %result.original_path.display(),
            output = %result.output_path.display(),
            saved_gib = bytes_to_gib(saved),
            total_saved_gib = bytes_to_gib(total_saved),
            seconds = result.seconds_taken,
            "Transcode completed"
        );
        self.notifier
            .notify(&completion_message(result, saved, total_saved))
            .await;
    }
}

/// Record the transcode and register its output as a library video.
///
/// Store failures are logged; the encode itself already succeeded.
pub async fn persist_result(
    store: &Arc<dyn VideoStore>,
    source: &VideoRecord,
    result: &TranscodeResult,
) {
    let output = output_record(source, result);
    let entry = result.clone();
    if let Err(e) = run_blocking(store, move |s| s.record_transcode(entry, output)).await {
        warn!(path = %result.original_path.display(), error = %e, "Failed to record transcode");
    }
}

/// Drop the store row for a deleted original; failures are logged.
pub async fn remove_row(store: &Arc<dyn VideoStore>, path: &Path) {
    let key = path.to_path_buf();
    if let Err(e) = run_blocking(store, move |s| s.delete(&key)).await {
        warn!(path = %path.display(), error = %e, "Failed to remove store row");
    }
}

/// Library record for a transcode output, derived from its source.
pub fn output_record(source: &VideoRecord, result: &TranscodeResult) -> VideoRecord {
    let mut out = VideoRecord::from_path(result.output_path.clone());
    out.size_bytes = result.new_size;
    out.duration_secs = source.duration_secs;
    out.frame_rate = source.frame_rate;
    out.frames = source.frames;
    out.bitrate = u64::from(result.new_bitrate_kbps) * 1000;
    match parse_dimensions(&result.new_resolution) {
        Some((w, h)) => {
            out.width = w;
            out.height = h;
        }
        None => {
            out.width = source.width;
            out.height = source.height;
        }
    }
    out
}

/// Parse `WxH` or `W:H`.
pub fn parse_dimensions(resolution: &str) -> Option<(u32, u32)> {
    let (w, h) = resolution.trim().split_once(['x', 'X', ':'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn completion_message(result: &TranscodeResult, saved: i64, total_saved: i64) -> String {
    format!(
        "Transcoding completed: {} -> {}\nSpace saved for this file: {:.2} GB\nTotal space saved so far: {:.2} GB",
        result.original_path.display(),
        result.output_path.display(),
        bytes_to_gib(saved),
        bytes_to_gib(total_saved)
    )
}

async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
