//! Library scanner.
//!
//! Walks a library root for video files, probes each with ffprobe and
//! upserts the resulting [`VideoRecord`] into the store so the selection
//! tree has something to offer.

use crate::record::VideoRecord;
use crate::store::{StoreError, VideoStore};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Video file extensions picked up by the scanner (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Library root {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("ffprobe failed on {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("Failed to parse ffprobe output for {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub indexed: usize,
    pub failed: usize,
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Every video file under `root`, sorted. Hidden directories are skipped.
pub fn find_videos(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !root.exists() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() && entry.depth() > 0 {
            if let Some(name) = entry.file_name().to_str() {
                return !name.starts_with('.');
            }
        }
        true
    });

    let mut videos: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    videos.sort();
    Ok(videos)
}

mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Output {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub nb_frames: Option<String>,
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Run `ffprobe -print_format json -show_streams -show_format` on `path`.
pub fn probe_video(ffprobe_bin: &Path, path: &Path) -> Result<VideoRecord, ScanError> {
    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| ScanError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ScanError::Probe {
            path: path.to_path_buf(),
            reason: format!(
                "exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let mut record = parse_probe(path, &String::from_utf8_lossy(&output.stdout))?;
    if record.size_bytes == 0 {
        record.size_bytes = std::fs::metadata(path)?.len();
    }
    Ok(record)
}

/// Build a record for `path` from ffprobe JSON.
///
/// Attributes come from the first video stream; bit rate falls back to the
/// container's when the stream has none.
pub fn parse_probe(path: &Path, json: &str) -> Result<VideoRecord, ScanError> {
    let parsed: ffprobe_json::Output = serde_json::from_str(json).map_err(|e| ScanError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let format = parsed.format.ok_or_else(|| ScanError::Parse {
        path: path.to_path_buf(),
        reason: "missing format section".to_string(),
    })?;
    let video = parsed
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ScanError::Parse {
            path: path.to_path_buf(),
            reason: "no video stream".to_string(),
        })?;

    let mut record = VideoRecord::from_path(path);
    record.width = video.width.unwrap_or(0);
    record.height = video.height.unwrap_or(0);
    record.duration_secs = parse_num(format.duration.as_deref()).unwrap_or(0.0);
    record.size_bytes = parse_num(format.size.as_deref()).unwrap_or(0);
    record.frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rational))
        .unwrap_or(0.0);
    record.frames = parse_num(video.nb_frames.as_deref())
        .unwrap_or_else(|| (record.duration_secs * record.frame_rate).round() as u64);
    record.bitrate = parse_num(video.bit_rate.as_deref())
        .or_else(|| parse_num(format.bit_rate.as_deref()))
        .unwrap_or(0);
    Ok(record)
}

fn parse_num<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value?.trim().parse().ok()
}

/// `24000/1001` style rates. A zero denominator yields `None`.
fn parse_rational(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((n, d)) => {
            let d: f64 = d.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            Some(n.trim().parse::<f64>().ok()? / d)
        }
        None => value.trim().parse().ok(),
    }
}

/// Probe every video under `root` and upsert it into `store`.
///
/// `root` is made absolute first, so stored paths are absolute whatever
/// the working directory. Files ffprobe cannot read are logged and
/// counted; store errors abort. All records are written in one batch.
pub fn scan_library(
    root: &Path,
    ffprobe_bin: &Path,
    store: &dyn VideoStore,
) -> Result<ScanSummary, ScanError> {
    scan_with(root, store, |path| probe_video(ffprobe_bin, path))
}

fn scan_with<F>(root: &Path, store: &dyn VideoStore, probe: F) -> Result<ScanSummary, ScanError>
where
    F: Fn(&Path) -> Result<VideoRecord, ScanError>,
{
    let root = match root.canonicalize() {
        Ok(root) => root,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::MissingRoot(root.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let videos = find_videos(&root)?;
    info!(root = %root.display(), files = videos.len(), "Scanning library");

    let mut summary = ScanSummary {
        found: videos.len(),
        ..ScanSummary::default()
    };
    let mut records = Vec::with_capacity(videos.len());
    for path in &videos {
        match probe(path) {
            Ok(record) => {
                debug!(path = %path.display(), resolution = %record.resolution(), "Indexed");
                records.push(record);
                summary.indexed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable video");
                summary.failed += 1;
            }
        }
    }

    store.insert_many(records)?;

    info!(
        indexed = summary.indexed,
        failed = summary.failed,
        "Scan finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "r_frame_rate": "24000/1001", "avg_frame_rate": "24000/1001",
             "nb_frames": "143856", "bit_rate": "7800000"}
        ],
        "format": {"duration": "6000.000000", "size": "6000000000", "bit_rate": "8000000"}
    }"#;

    #[test]
    fn test_parse_probe_reads_first_video_stream() {
        let record = parse_probe(Path::new("/lib/Heat 1080p.mkv"), PROBE_JSON).unwrap();
        assert_eq!(record.name, "Heat 1080p.mkv");
        assert_eq!((record.width, record.height), (1920, 1080));
        assert_eq!(record.size_bytes, 6_000_000_000);
        assert_eq!(record.frames, 143_856);
        assert_eq!(record.bitrate, 7_800_000);
        assert!((record.duration_secs - 6000.0).abs() < f64::EPSILON);
        assert!((record.frame_rate - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_parse_probe_falls_back_to_container_bitrate() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 1280, "height": 720, "r_frame_rate": "25/1"}],
            "format": {"duration": "10.0", "bit_rate": "2000000"}
        }"#;
        let record = parse_probe(Path::new("/lib/a.mp4"), json).unwrap();
        assert_eq!(record.bitrate, 2_000_000);
        assert_eq!(record.frames, 250);
        assert_eq!(record.size_bytes, 0);
    }

    #[test]
    fn test_parse_probe_without_video_is_error() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "1"}}"#;
        let err = parse_probe(Path::new("/lib/a.mkv"), json).unwrap_err();
        assert!(matches!(err, ScanError::Parse { .. }));
        assert!(parse_probe(Path::new("/lib/a.mkv"), "not json").is_err());
    }

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("25/1"), Some(25.0));
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("30"), Some(30.0));
    }

    #[test]
    fn test_find_videos_skips_hidden_and_non_video() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("movies")).unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        File::create(root.join("movies/b.MKV")).unwrap();
        File::create(root.join("a.mp4")).unwrap();
        File::create(root.join("notes.txt")).unwrap();
        File::create(root.join(".trash/old.mkv")).unwrap();

        let videos = find_videos(root).unwrap();
        assert_eq!(videos, vec![root.join("a.mp4"), root.join("movies/b.MKV")]);
    }

    #[test]
    fn test_missing_root() {
        let err = find_videos(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn test_scan_upserts_and_counts_failures() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        File::create(lib.join("good.mkv")).unwrap();
        File::create(lib.join("broken.mkv")).unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();

        let probe = |path: &Path| {
            if path.ends_with("broken.mkv") {
                Err(ScanError::Probe {
                    path: path.to_path_buf(),
                    reason: "exit 1".to_string(),
                })
            } else {
                parse_probe(path, PROBE_JSON)
            }
        };
        let summary = scan_with(&lib, &store, probe).unwrap();
        assert_eq!(
            summary,
            ScanSummary {
                found: 2,
                indexed: 1,
                failed: 1
            }
        );

        // Rescanning replaces rather than duplicates.
        scan_with(&lib, &store, probe).unwrap();
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path, lib.canonicalize().unwrap().join("good.mkv"));
    }

    #[test]
    fn test_scan_stores_absolute_paths() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir_all(lib.join("tv")).unwrap();
        File::create(lib.join("tv/a.mkv")).unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();

        let roundabout = lib.join("tv").join("..");
        scan_with(&roundabout, &store, |path| parse_probe(path, PROBE_JSON)).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].path.is_absolute());
        assert_eq!(all[0].path, lib.canonicalize().unwrap().join("tv/a.mkv"));
        assert_eq!(all[0].location, lib.canonicalize().unwrap().join("tv"));
    }

    #[test]
    fn test_scan_missing_root() {
        let store_dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(store_dir.path().join("s.json")).unwrap();
        let err = scan_with(Path::new("/definitely/not/here"), &store, |path| {
            parse_probe(path, PROBE_JSON)
        })
        .unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_video_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("mkv"), Just("MKV"), Just("mp4"), Just("Mp4"),
                Just("avi"), Just("mov"), Just("m4v"), Just("TS"), Just("m2ts"),
                Just("txt"), Just("jpg"), Just("srt"), Just("nfo"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));
            let expected = matches!(
                ext.to_lowercase().as_str(),
                "mkv" | "mp4" | "avi" | "mov" | "m4v" | "ts" | "m2ts"
            );
            prop_assert_eq!(is_video_file(&path), expected);
        }
    }
}
