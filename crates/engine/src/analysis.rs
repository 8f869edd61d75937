//! Size estimates for a selection before any transcode is started.
//!
//! The estimate assumes every file is re-encoded at a flat video rate with
//! a flat audio rate, so output size depends only on duration. Rates are in
//! kilobits per second of 1000 bits, the unit ffmpeg reads `-b:v 1500k` in.

use crate::progress::format_duration;
use crate::prompt::Prompt;
use crate::record::{bytes_to_gib, VideoRecord};
use crate::selection::{Selection, SelectionError};
use crate::session::{gather_criteria, select_matching, SessionArgs};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_VIDEO_KBPS: u32 = 1500;
pub const DEFAULT_AUDIO_KBPS: u32 = 160;

/// Output rates the estimate is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateRates {
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl Default for EstimateRates {
    fn default() -> Self {
        Self {
            video_kbps: DEFAULT_VIDEO_KBPS,
            audio_kbps: DEFAULT_AUDIO_KBPS,
        }
    }
}

impl EstimateRates {
    pub fn bytes_per_sec(&self) -> u64 {
        (u64::from(self.video_kbps) + u64::from(self.audio_kbps)) * 1000 / 8
    }

    /// Estimated output size of a file `duration_secs` long.
    ///
    /// Unknown or negative durations estimate to 0.
    pub fn estimate_bytes(&self, duration_secs: f64) -> u64 {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0;
        }
        // `as` saturates at u64::MAX.
        (duration_secs * self.bytes_per_sec() as f64).round() as u64
    }
}

/// Totals over the analysed files.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalysisReport {
    pub files: usize,
    pub total_duration_secs: f64,
    pub original_bytes: u64,
    pub estimated_bytes: u64,
}

impl AnalysisReport {
    /// Negative when the files are already smaller than the estimate.
    pub fn savings_bytes(&self) -> i64 {
        let diff = i128::from(self.original_bytes) - i128::from(self.estimated_bytes);
        diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let length = Duration::from_secs(self.total_duration_secs.max(0.0) as u64);
        writeln!(f, "Analysed files: {}", self.files)?;
        writeln!(
            f,
            "Total length: {} seconds ({})",
            length.as_secs(),
            format_duration(length)
        )?;
        writeln!(
            f,
            "Original size: {:.2} GB",
            bytes_to_gib(self.original_bytes as i64)
        )?;
        writeln!(
            f,
            "Estimated transcoded size: {:.2} GB",
            bytes_to_gib(self.estimated_bytes as i64)
        )?;
        write!(
            f,
            "Estimated savings: {:.2} GB",
            bytes_to_gib(self.savings_bytes())
        )
    }
}

/// Sum length and size of `records` and estimate their size at `rates`.
pub fn analyse(records: &[VideoRecord], rates: EstimateRates) -> AnalysisReport {
    let report = records.iter().fold(
        AnalysisReport {
            files: records.len(),
            ..AnalysisReport::default()
        },
        |mut acc, record| {
            acc.total_duration_secs += record.duration_secs.max(0.0);
            acc.original_bytes = acc.original_bytes.saturating_add(record.size_bytes);
            acc.estimated_bytes = acc
                .estimated_bytes
                .saturating_add(rates.estimate_bytes(record.duration_secs));
            acc
        },
    );
    info!(
        files = report.files,
        original_bytes = report.original_bytes,
        estimated_bytes = report.estimated_bytes,
        "Analysis finished"
    );
    report
}

/// Selection dialogue for an analysis: size, resolution and minimum length,
/// then navigation or `args.dir`.
pub fn select_for_analysis<P, W>(
    library: Vec<VideoRecord>,
    args: &SessionArgs,
    prompt: &mut P,
    out: &mut W,
) -> Result<Selection, SelectionError>
where
    P: Prompt + ?Sized,
    W: Write,
{
    if library.is_empty() {
        return Err(SelectionError::EmptyLibrary);
    }
    let criteria = gather_criteria(args, prompt, true)?;
    select_matching(library, &criteria, args, prompt, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompt;
    use crate::record::BYTES_PER_GIB;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn video(path: &str, duration_secs: f64, size_bytes: u64) -> VideoRecord {
        let mut r = VideoRecord::from_path(path);
        r.width = 1920;
        r.height = 1080;
        r.duration_secs = duration_secs;
        r.size_bytes = size_bytes;
        r
    }

    #[test]
    fn test_default_rates() {
        // 1660 kbit/s
        assert_eq!(EstimateRates::default().bytes_per_sec(), 207_500);
        assert_eq!(EstimateRates::default().estimate_bytes(60.0), 12_450_000);
    }

    #[test]
    fn test_unknown_duration_estimates_zero() {
        let rates = EstimateRates::default();
        assert_eq!(rates.estimate_bytes(0.0), 0);
        assert_eq!(rates.estimate_bytes(-5.0), 0);
        assert_eq!(rates.estimate_bytes(f64::NAN), 0);
        assert_eq!(rates.estimate_bytes(f64::INFINITY), 0);
    }

    #[test]
    fn test_analyse_totals() {
        let rates = EstimateRates {
            video_kbps: 1000,
            audio_kbps: 0,
        };
        let records = vec![
            video("/lib/a.mkv", 3600.0, 2_000_000_000),
            video("/lib/b.mkv", 1800.0, 100_000_000),
        ];
        let report = analyse(&records, rates);
        assert_eq!(report.files, 2);
        assert_eq!(report.total_duration_secs, 5400.0);
        assert_eq!(report.original_bytes, 2_100_000_000);
        assert_eq!(report.estimated_bytes, 675_000_000);
        assert_eq!(report.savings_bytes(), 1_425_000_000);
    }

    #[test]
    fn test_savings_can_be_negative() {
        let report = analyse(
            &[video("/lib/small.mp4", 600.0, 1_000)],
            EstimateRates::default(),
        );
        assert!(report.savings_bytes() < 0);
    }

    #[test]
    fn test_empty_report_renders() {
        let text = analyse(&[], EstimateRates::default()).to_string();
        assert!(text.contains("Analysed files: 0"));
        assert!(text.contains("Total length: 0 seconds (00:00:00)"));
        assert!(text.contains("Estimated savings: 0.00 GB"));
    }

    #[test]
    fn test_report_render() {
        let report = AnalysisReport {
            files: 3,
            total_duration_secs: 3725.9,
            original_bytes: (3.0 * BYTES_PER_GIB) as u64,
            estimated_bytes: (1.0 * BYTES_PER_GIB) as u64,
        };
        assert_eq!(
            report.to_string(),
            "Analysed files: 3\n\
             Total length: 3725 seconds (01:02:05)\n\
             Original size: 3.00 GB\n\
             Estimated transcoded size: 1.00 GB\n\
             Estimated savings: 2.00 GB"
        );
    }

    #[test]
    fn test_select_for_analysis_filters_by_duration() {
        let library = vec![
            video("/lib/tv/short.mkv", 1200.0, 1),
            video("/lib/tv/long.mkv", 7200.0, 1),
        ];
        let args = SessionArgs {
            dir: Some(PathBuf::from("/lib/tv")),
            ..SessionArgs::default()
        };
        // min size, resolution, min duration
        let mut prompt = ScriptedPrompt::new(["0", "1920x1080", "3600"]);
        let selection =
            select_for_analysis(library, &args, &mut prompt, &mut Vec::new()).unwrap();
        let names: Vec<_> = selection.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["long.mkv"]);
        assert_eq!(prompt.asked.len(), 3);
    }

    #[test]
    fn test_select_for_analysis_empty_library() {
        let mut prompt = ScriptedPrompt::default();
        let err = select_for_analysis(
            Vec::new(),
            &SessionArgs::default(),
            &mut prompt,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::EmptyLibrary));
        assert!(prompt.asked.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_estimate_grows_with_duration(
            video_kbps in 0u32..100_000,
            audio_kbps in 0u32..1_000,
            shorter in 0.0f64..100_000.0,
            extra in 0.0f64..100_000.0,
        ) {
            let rates = EstimateRates { video_kbps, audio_kbps };
            prop_assert!(rates.estimate_bytes(shorter) <= rates.estimate_bytes(shorter + extra));
        }

        #[test]
        fn prop_report_sums_records(
            entries in prop::collection::vec((0.0f64..20_000.0, 0u64..50_000_000_000), 0..20),
        ) {
            let records: Vec<VideoRecord> = entries
                .iter()
                .enumerate()
                .map(|(i, (d, s))| video(&format!("/lib/{}.mkv", i), *d, *s))
                .collect();
            let rates = EstimateRates::default();
            let report = analyse(&records, rates);
            let expected: u64 = entries.iter().map(|(d, _)| rates.estimate_bytes(*d)).sum();
            prop_assert_eq!(report.files, entries.len());
            prop_assert_eq!(report.estimated_bytes, expected);
            prop_assert_eq!(report.original_bytes, entries.iter().map(|(_, s)| *s).sum::<u64>());
        }
    }
}
