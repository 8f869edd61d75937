//! Wire types shared by the dispatcher and remote workers.

use crate::record::{TranscodeResult, VideoRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Body of `POST /transcode` on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJobRequest {
    /// Roster name the dispatcher charged a credit to; echoed in the callback
    pub worker: String,
    pub record: VideoRecord,
    /// Output size, `WxH`
    pub resolution: String,
    pub bitrate_kbps: u32,
    pub auto_delete: bool,
    /// Where the worker reports completion
    pub callback_url: String,
}

impl RemoteJobRequest {
    /// Reason the request cannot be run, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.resolution.trim().is_empty() {
            return Err("resolution is empty".to_string());
        }
        if self.bitrate_kbps == 0 {
            return Err("bitrate must be positive".to_string());
        }
        if self.record.path.as_os_str().is_empty() {
            return Err("video path is empty".to_string());
        }
        Ok(())
    }
}

/// Result of a remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { result: TranscodeResult },
    Failed { source_path: PathBuf, error: String },
}

/// Body of `POST /callback` on the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub worker: String,
    pub outcome: JobOutcome,
}

/// Reply to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    /// False when the worker name is not on the roster
    pub accepted: bool,
    /// Jobs still awaiting a callback
    pub outstanding: usize,
}
