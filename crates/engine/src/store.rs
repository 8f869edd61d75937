//! Video metadata store.
//!
//! The engine only talks to [`VideoStore`]. [`JsonFileStore`] is the bundled
//! implementation: every mutation rewrites one JSON document through a temp
//! file and rename so a crash never leaves a half-written store behind.

use crate::record::{TranscodeResult, VideoRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No video record for {0}")]
    NotFound(PathBuf),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Attribute lookup and persistence keyed by absolute path.
///
/// Implementations must be safe for concurrent single-row access from many
/// job tasks.
pub trait VideoStore: Send + Sync {
    fn lookup(&self, path: &Path) -> Result<Option<VideoRecord>, StoreError>;

    /// Insert or replace the record at `record.path`.
    fn insert(&self, record: VideoRecord) -> Result<(), StoreError>;

    /// Insert or replace many records at once.
    fn insert_many(&self, records: Vec<VideoRecord>) -> Result<(), StoreError> {
        records.into_iter().try_for_each(|r| self.insert(r))
    }

    /// Replace an existing record. Fails with `NotFound` if absent.
    fn update(&self, record: VideoRecord) -> Result<(), StoreError>;

    /// Remove a record. Returns whether one existed.
    fn delete(&self, path: &Path) -> Result<bool, StoreError>;

    /// Every record, ordered by path.
    fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError>;

    /// Records whose directory is `dir` or lies beneath it.
    fn list_by_directory_prefix(&self, dir: &Path) -> Result<Vec<VideoRecord>, StoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.location.starts_with(dir))
            .collect())
    }

    fn insert_transcode(&self, result: TranscodeResult) -> Result<(), StoreError>;

    /// Append `result` to the history and register its output video.
    fn record_transcode(
        &self,
        result: TranscodeResult,
        output: VideoRecord,
    ) -> Result<(), StoreError> {
        self.insert_transcode(result)?;
        self.insert(output)
    }

    fn transcodes(&self) -> Result<Vec<TranscodeResult>, StoreError>;
}

/// Run `f` against `store` on the blocking pool.
pub async fn run_blocking<T, F>(store: &Arc<dyn VideoStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn VideoStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .unwrap_or_else(|e| Err(StoreError::Task(e.to_string())))
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    videos: BTreeMap<PathBuf, VideoRecord>,
    #[serde(default)]
    transcodes: Vec<TranscodeResult>,
}

/// [`VideoStore`] backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => StoreDocument::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> Result<T, StoreError> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&doc))
    }

    /// Apply `f` to a copy of the document and keep it only once the copy
    /// is on disk.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = doc.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *doc = next;
        Ok(out)
    }

    fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &json).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

impl VideoStore for JsonFileStore {
    fn lookup(&self, path: &Path) -> Result<Option<VideoRecord>, StoreError> {
        self.read(|doc| doc.videos.get(path).cloned())
    }

    fn insert(&self, record: VideoRecord) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.videos.insert(record.path.clone(), record);
            Ok(())
        })
    }

    fn insert_many(&self, records: Vec<VideoRecord>) -> Result<(), StoreError> {
        self.write(|doc| {
            for record in records {
                doc.videos.insert(record.path.clone(), record);
            }
            Ok(())
        })
    }

    fn update(&self, record: VideoRecord) -> Result<(), StoreError> {
        self.write(|doc| match doc.videos.get_mut(&record.path) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound(record.path)),
        })
    }

    fn delete(&self, path: &Path) -> Result<bool, StoreError> {
        self.write(|doc| Ok(doc.videos.remove(path).is_some()))
    }

    fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        self.read(|doc| doc.videos.values().cloned().collect())
    }

    fn insert_transcode(&self, result: TranscodeResult) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.transcodes.push(result);
            Ok(())
        })
    }

    fn record_transcode(
        &self,
        result: TranscodeResult,
        output: VideoRecord,
    ) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.transcodes.push(result);
            doc.videos.insert(output.path.clone(), output);
            Ok(())
        })
    }

    fn transcodes(&self) -> Result<Vec<TranscodeResult>, StoreError> {
        self.read(|doc| doc.transcodes.clone())
    }
}
