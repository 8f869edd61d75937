//! Checkpoint file for detached batches.
//!
//! A background run saves its [`BatchRequest`] and starts a second process
//! that loads it and runs the batch, logging to a file. The checkpoint is a
//! plain persisted request record and is removed once the batch finishes.

use crate::scheduler::BatchRequest;
use crate::store::write_atomic;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode checkpoint {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to start background process: {0}")]
    Spawn(std::io::Error),
}

/// Handle to a checkpoint file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `request` through a temp file and rename.
    pub fn save(&self, request: &BatchRequest) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(request)?;
        write_atomic(&self.path, &json).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn load(&self) -> Result<BatchRequest, CheckpointError> {
        let content = fs::read(&self.path).map_err(|source| CheckpointError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| CheckpointError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Delete the file. A missing file is not an error.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Checkpoint removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove checkpoint"),
        }
    }
}

/// Arguments for the detached process.
pub fn resume_args(config: Option<&Path>, checkpoint: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(config) = config {
        args.push("--config".to_string());
        args.push(config.to_string_lossy().into_owned());
    }
    args.push("resume".to_string());
    args.push("--checkpoint".to_string());
    args.push(checkpoint.to_string_lossy().into_owned());
    args
}

/// Start `exe resume --checkpoint <path>` in its own process group with
/// stdout and stderr appended to `log_path`. Returns the child pid.
pub fn spawn_detached(
    exe: &Path,
    config: Option<&Path>,
    checkpoint: &Checkpoint,
    log_path: &Path,
) -> Result<u32, CheckpointError> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(CheckpointError::Spawn)?;
    let log_err = log.try_clone().map_err(CheckpointError::Spawn)?;

    let mut cmd = Command::new(exe);
    cmd.args(resume_args(config, checkpoint.path()))
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn().map_err(CheckpointError::Spawn)?;
    info!(pid = child.id(), log = %log_path.display(), "Background batch started");
    Ok(child.id())
}
