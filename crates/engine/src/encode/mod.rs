//! Media encoding.
//!
//! The job executor drives an [`Encoder`] and only sees raw progress lines
//! on a channel; turning those into percentages is the tracker's job.

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, FfmpegEncoder};

use crate::hardware::HardwareAccel;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder process could not be started
    #[error("Failed to start encoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Encoder exited with non-zero status
    #[error("Encoder failed with exit code: {0}")]
    Failed(i32),

    /// Encoder was terminated by signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// IO error while waiting on the encoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for one transcode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Target size as `WxH` or `W:H`
    pub resolution: String,
    pub bitrate_kbps: u32,
    pub hardware: HardwareAccel,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run one encode to completion, forwarding progress output lines to
    /// `progress`. Returns once the process has exited.
    async fn encode(
        &self,
        params: &EncodeParams,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<(), EncodeError>;
}
