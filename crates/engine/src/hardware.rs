//! Hardware acceleration probing.
//!
//! Detection order:
//! - `nvidia-smi` exits successfully: NVIDIA (NVENC)
//! - `vainfo` output mentions Intel: Intel Quick Sync
//! - otherwise software x264

use std::fmt;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};
use vidbatch_config::HardwarePreference;

/// Acceleration backend used for a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareAccel {
    Software,
    Nvidia,
    Intel,
}

impl HardwareAccel {
    /// ffmpeg video encoder name
    pub fn encoder(self) -> &'static str {
        match self {
            HardwareAccel::Software => "libx264",
            HardwareAccel::Nvidia => "h264_nvenc",
            HardwareAccel::Intel => "h264_qsv",
        }
    }

    /// ffmpeg video filter scaling to `resolution`, given as `WxH` or `W:H`.
    pub fn scale_filter(self, resolution: &str) -> String {
        let dims = resolution.trim().replacen(&['x', 'X'][..], ":", 1);
        match self {
            HardwareAccel::Nvidia => format!("scale_npp={}", dims),
            HardwareAccel::Software | HardwareAccel::Intel => format!("scale={}", dims),
        }
    }

    /// Decoder-side flags placed before `-i`.
    pub fn input_args(self) -> &'static [&'static str] {
        match self {
            HardwareAccel::Software => &[],
            HardwareAccel::Nvidia => &["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"],
            HardwareAccel::Intel => &["-hwaccel", "qsv"],
        }
    }
}

impl fmt::Display for HardwareAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareAccel::Software => write!(f, "cpu"),
            HardwareAccel::Nvidia => write!(f, "nvidia"),
            HardwareAccel::Intel => write!(f, "intel"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Decide the backend from probe results.
pub fn classify_probe(nvidia_smi_ok: bool, vainfo_output: Option<&str>) -> HardwareAccel {
    if nvidia_smi_ok {
        HardwareAccel::Nvidia
    } else if vainfo_output.is_some_and(|out| out.contains("Intel")) {
        HardwareAccel::Intel
    } else {
        HardwareAccel::Software
    }
}

/// Probe the host for a usable hardware encoder.
pub fn detect_hardware() -> HardwareAccel {
    let nvidia_smi_ok = Command::new("nvidia-smi")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    let vainfo_output = if nvidia_smi_ok {
        None
    } else {
        Command::new("vainfo").output().ok().map(|o| {
            // vainfo prints its driver banner on stderr on some distros
            let mut text = String::from_utf8_lossy(&o.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&o.stderr));
            text
        })
    };

    let accel = classify_probe(nvidia_smi_ok, vainfo_output.as_deref());
    debug!(nvidia_smi_ok, "Hardware probe finished");
    accel
}

/// Resolve the configured preference, probing when it is `auto`.
pub fn resolve(preference: HardwarePreference) -> HardwareAccel {
    let accel = match preference {
        HardwarePreference::Auto => detect_hardware(),
        HardwarePreference::None => HardwareAccel::Software,
        HardwarePreference::Nvidia => HardwareAccel::Nvidia,
        HardwarePreference::Intel => HardwareAccel::Intel,
    };
    info!(hardware = %accel, encoder = accel.encoder(), "Using encoder backend");
    accel
}

/// Check that `ffmpeg -version` runs.
pub fn check_ffmpeg_available(ffmpeg_bin: &Path) -> Result<(), HardwareError> {
    let output = Command::new(ffmpeg_bin)
        .arg("-version")
        .output()
        .map_err(|e| {
            HardwareError::FfmpegUnavailable(format!(
                "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg_bin.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(HardwareError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_bin.display(),
            output.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_probe_order() {
        assert_eq!(classify_probe(true, Some("Intel iHD driver")), HardwareAccel::Nvidia);
        assert_eq!(
            classify_probe(false, Some("vainfo: Driver version: Intel iHD driver")),
            HardwareAccel::Intel
        );
        assert_eq!(classify_probe(false, Some("Mesa Gallium driver")), HardwareAccel::Software);
        assert_eq!(classify_probe(false, None), HardwareAccel::Software);
    }

    #[test]
    fn test_backend_flags() {
        assert_eq!(HardwareAccel::Nvidia.encoder(), "h264_nvenc");
        assert_eq!(HardwareAccel::Nvidia.scale_filter("1280:720"), "scale_npp=1280:720");
        assert_eq!(HardwareAccel::Intel.encoder(), "h264_qsv");
        assert_eq!(HardwareAccel::Intel.input_args(), &["-hwaccel", "qsv"]);
        assert_eq!(HardwareAccel::Software.scale_filter("1920:1080"), "scale=1920:1080");
        assert_eq!(HardwareAccel::Intel.scale_filter("1280x720"), "scale=1280:720");
        assert!(HardwareAccel::Software.input_args().is_empty());
    }

    #[test]
    fn test_forced_preferences_skip_probe() {
        assert_eq!(resolve(HardwarePreference::None), HardwareAccel::Software);
        assert_eq!(resolve(HardwarePreference::Nvidia), HardwareAccel::Nvidia);
        assert_eq!(resolve(HardwarePreference::Intel), HardwareAccel::Intel);
    }

    #[test]
    fn test_missing_ffmpeg_binary() {
        let err = check_ffmpeg_available(Path::new("/nonexistent/ffmpeg-bin")).unwrap_err();
        assert!(err.to_string().contains("ffmpeg not available"));
    }
}
