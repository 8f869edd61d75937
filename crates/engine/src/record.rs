//! Video record and transcode result types shared across the engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bytes per GiB, used for every operator-facing size figure.
pub const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One indexed video file and its probed attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    /// Display name (file name with extension)
    pub name: String,
    /// Containing directory
    pub location: PathBuf,
    /// Absolute path; identity of the record
    pub path: PathBuf,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    /// Duration in seconds
    pub duration_secs: f64,
    pub frame_rate: f64,
    pub frames: u64,
    /// Bit rate in bits per second
    pub bitrate: u64,
    /// Extension including the leading dot, e.g. `.mkv`
    pub extension: String,
}

impl VideoRecord {
    /// Build a record for `path`, deriving name, location and extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let location = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let extension = extension_of(&path);

        Self {
            name,
            location,
            path,
            size_bytes: 0,
            width: 0,
            height: 0,
            duration_secs: 0.0,
            frame_rate: 0.0,
            frames: 0,
            bitrate: 0,
            extension,
        }
    }

    /// `WIDTHxHEIGHT`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn size_gib(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_GIB
    }
}

/// File extension with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Outcome of one completed transcode. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeResult {
    pub original_path: PathBuf,
    pub output_path: PathBuf,
    pub old_extension: String,
    pub new_extension: String,
    pub old_size: u64,
    pub new_size: u64,
    pub old_resolution: String,
    pub new_resolution: String,
    /// Source bit rate in bits per second
    pub old_bitrate: u64,
    /// Requested bit rate in kbps
    pub new_bitrate_kbps: u32,
    pub seconds_taken: u64,
}

impl TranscodeResult {
    /// Bytes saved by this transcode. Negative when the output grew.
    pub fn space_saved(&self) -> i64 {
        space_saved(self.old_size, self.new_size)
    }
}

/// Signed difference `old - new` in bytes.
pub fn space_saved(old_size: u64, new_size: u64) -> i64 {
    old_size as i64 - new_size as i64
}

/// Bytes as GiB for display.
pub fn bytes_to_gib(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}
