//! Output naming for transcoded files.

use crate::record::VideoRecord;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Marker that replaces a resolution tag in the output name.
pub const CODED_TAG: &str = "vbcoded";

fn resolution_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(4k|2160p|1080p|720p)").expect("static regex is valid"))
}

/// New file name for a transcode of `name`.
///
/// Every resolution tag (`4k`, `2160p`, `1080p`, `720p`, any case) is
/// replaced with the coded marker. Names without a tag get `_vbcoded`
/// inserted before the extension.
pub fn output_name(name: &str) -> String {
    let re = resolution_tag_regex();
    if re.is_match(name) {
        return re.replace_all(name, CODED_TAG).into_owned();
    }

    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}_{}.{}",
            stem.to_string_lossy(),
            CODED_TAG,
            ext.to_string_lossy()
        ),
        _ => format!("{}_{}", name, CODED_TAG),
    }
}

/// Output path next to the source file.
pub fn output_path_for(record: &VideoRecord) -> PathBuf {
    record.location.join(output_name(&record.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tag_replaced() {
        assert_eq!(output_name("Heat 1080p.mkv"), "Heat vbcoded.mkv");
        assert_eq!(output_name("Dune.2021.2160P.HDR.mkv"), "Dune.2021.vbcoded.HDR.mkv");
        assert_eq!(output_name("nature_4K.mp4"), "nature_vbcoded.mp4");
    }

    #[test]
    fn test_suffix_appended_without_tag() {
        assert_eq!(output_name("holiday.mp4"), "holiday_vbcoded.mp4");
        assert_eq!(output_name("raw"), "raw_vbcoded");
    }

    #[test]
    fn test_output_path_same_directory() {
        let record = VideoRecord::from_path("/lib/movies/Heat 720p.mkv");
        assert_eq!(
            output_path_for(&record),
            PathBuf::from("/lib/movies/Heat vbcoded.mkv")
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_output_name_differs_and_keeps_extension(
            stem in "[a-zA-Z ._-]{1,20}[a-zA-Z]",
            ext in prop_oneof![Just("mkv"), Just("mp4"), Just("avi")],
        ) {
            let name = format!("{}.{}", stem, ext);
            let out = output_name(&name);
            prop_assert_ne!(&out, &name);
            prop_assert!(out.contains(CODED_TAG));
            let dotted_ext = format!(".{}", ext);
            prop_assert!(out.ends_with(&dotted_ext));
        }
    }
}
