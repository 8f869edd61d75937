//! Operator selection: the chosen records and the filters that pick them.

use crate::record::{VideoRecord, BYTES_PER_GIB};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported back to the operator while building a selection.
///
/// None of these are fatal; the operator can start the selection again.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No videos in the store; run a scan first")]
    EmptyLibrary,

    #[error("Directory {0} is not part of the indexed library")]
    UnknownDirectory(String),

    #[error("No files found matching criteria")]
    NoMatches,

    #[error("Selection aborted by operator")]
    Aborted,

    #[error("Failed to read operator input: {0}")]
    Input(#[from] std::io::Error),
}

/// Ordered set of records chosen by the operator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub records: Vec<VideoRecord>,
    /// Whether descendant directories were included
    pub recursive: bool,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }
}

/// Source resolution class an operator can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionClass {
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4k")]
    Uhd4k,
}

impl ResolutionClass {
    /// 4k accepts anything at least 3840x2160; the HD classes match exactly.
    pub fn matches(self, width: u32, height: u32) -> bool {
        match self {
            ResolutionClass::Uhd4k => width >= 3840 && height >= 2160,
            ResolutionClass::P1080 => width == 1920 && height == 1080,
            ResolutionClass::P720 => width == 1280 && height == 720,
        }
    }
}

impl std::str::FromStr for ResolutionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            "4k" | "2160p" => Ok(Self::Uhd4k),
            other => Err(format!(
                "unknown resolution '{}', expected 720p, 1080p or 4k",
                other
            )),
        }
    }
}

impl std::fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionClass::P720 => write!(f, "720p"),
            ResolutionClass::P1080 => write!(f, "1080p"),
            ResolutionClass::Uhd4k => write!(f, "4k"),
        }
    }
}

/// Source resolution an operator filters on: a class, an exact size, or anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFilter {
    Class(ResolutionClass),
    Exact { width: u32, height: u32 },
    All,
}

impl ResolutionFilter {
    pub fn matches(self, width: u32, height: u32) -> bool {
        match self {
            ResolutionFilter::Class(class) => class.matches(width, height),
            ResolutionFilter::Exact { width: w, height: h } => width == w && height == h,
            ResolutionFilter::All => true,
        }
    }
}

impl From<ResolutionClass> for ResolutionFilter {
    fn from(class: ResolutionClass) -> Self {
        ResolutionFilter::Class(class)
    }
}

impl std::str::FromStr for ResolutionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if let Ok(class) = s.parse::<ResolutionClass>() {
            return Ok(Self::Class(class));
        }
        let exact = s
            .split_once(['x', 'X'])
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
        match exact {
            Some((width, height)) if width > 0 && height > 0 => Ok(Self::Exact { width, height }),
            _ => Err(format!(
                "unknown resolution '{}', expected 720p, 1080p, 4k, WxH or all",
                s
            )),
        }
    }
}

impl std::fmt::Display for ResolutionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionFilter::Class(class) => write!(f, "{}", class),
            ResolutionFilter::Exact { width, height } => write!(f, "{}x{}", width, height),
            ResolutionFilter::All => write!(f, "all"),
        }
    }
}

/// Attribute filter applied while navigating and selecting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionCriteria {
    pub min_size_gib: f64,
    pub source_resolution: ResolutionFilter,
    /// 0 accepts any length
    pub min_duration_secs: f64,
}

impl SelectionCriteria {
    pub fn matches(&self, record: &VideoRecord) -> bool {
        record.size_bytes as f64 / BYTES_PER_GIB >= self.min_size_gib
            && self.source_resolution.matches(record.width, record.height)
            && record.duration_secs >= self.min_duration_secs
    }
}
