//! ffmpeg encoder.
//!
//! Builds an H.264 transcode with the backend's decoder flags, scale filter
//! and encoder, copies audio, and asks ffmpeg for machine-readable progress
//! on stderr (`-nostats -progress pipe:2`).

use super::{EncodeError, EncodeParams, Encoder};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Build the ffmpeg command for `params`.
///
/// Argument order: `-y`, hardware input flags, `-i SRC`, `-vf FILTER`,
/// `-c:a copy`, `-c:v ENCODER`, `-b:v {kbps}k`, progress flags, `OUT`.
pub fn build_ffmpeg_command(ffmpeg_bin: &std::path::Path, params: &EncodeParams) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.arg("-y");
    cmd.args(params.hardware.input_args());
    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-vf")
        .arg(params.hardware.scale_filter(&params.resolution));
    cmd.arg("-c:a").arg("copy");
    cmd.arg("-c:v").arg(params.hardware.encoder());
    cmd.arg("-b:v").arg(format!("{}k", params.bitrate_kbps));
    cmd.arg("-nostats").arg("-progress").arg("pipe:2");
    cmd.arg(&params.output_path);
    cmd
}

/// Runs ffmpeg as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        params: &EncodeParams,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<(), EncodeError> {
        let mut cmd = build_ffmpeg_command(&self.ffmpeg_bin, params);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = format!("{:?}", cmd.as_std());
        info!(command = %command_line, "Running ffmpeg");

        let mut child = cmd.spawn().map_err(EncodeError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            forward_lines(BufReader::new(stderr), &progress).await;
        }
        drop(progress);

        let status = child.wait().await?;
        debug!(status = %status, input = %params.input_path.display(), "ffmpeg exited");

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(EncodeError::Failed(code)),
                None => Err(EncodeError::Terminated),
            }
        }
    }
}

/// Send every line of `reader` to `progress` until end of input.
///
/// ffmpeg echoes container metadata verbatim, so lines are decoded lossily.
/// A read error ends forwarding but never the encode.
async fn forward_lines<R>(mut reader: R, progress: &mpsc::UnboundedSender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                // Receiver gone means nobody is tracking; keep draining.
                let _ = progress.send(line.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(e) => {
                warn!(error = %e, "Stopped reading ffmpeg output");
                break;
            }
        }
    }
}
