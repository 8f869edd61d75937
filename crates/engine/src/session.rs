//! Operator session: turn command-line values and prompts into a selection
//! and the settings for the batch that follows.
//!
//! Every value the operator did not pass on the command line is prompted
//! for, in the same order each run.

use crate::index::DirectoryNode;
use crate::navigate::{navigate, NavOutcome};
use crate::prompt::{ask_bool, ask_parsed, ask_string, Prompt};
use crate::record::VideoRecord;
use crate::selection::{ResolutionFilter, Selection, SelectionCriteria, SelectionError};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

/// Values given up front; `None` means ask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionArgs {
    /// Select this directory without navigating
    pub dir: Option<PathBuf>,
    pub recursive: bool,
    pub min_size_gib: Option<f64>,
    pub source_resolution: Option<ResolutionFilter>,
    /// Minimum length in seconds; only asked for when analysing
    pub min_duration_secs: Option<f64>,
    /// Output size, `WxH`
    pub resolution: Option<String>,
    pub bitrate_kbps: Option<u32>,
    /// 0 picks the default for this host
    pub max_concurrent: Option<u32>,
    pub auto_delete: Option<bool>,
}

/// Batch settings gathered after the selection.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub resolution: String,
    pub bitrate_kbps: u32,
    /// Requested job limit; 0 when the host default should apply
    pub max_concurrent: u32,
    pub auto_delete: bool,
}

/// Build the attribute filter from `args`, prompting for what is missing.
///
/// Without `ask_duration` a missing minimum length means no minimum.
pub fn gather_criteria<P>(
    args: &SessionArgs,
    prompt: &mut P,
    ask_duration: bool,
) -> io::Result<SelectionCriteria>
where
    P: Prompt + ?Sized,
{
    let min_size_gib = match args.min_size_gib {
        Some(v) => v,
        None => ask_parsed(prompt, "Enter the minimum file size in GB: ")?,
    };
    let source_resolution = match args.source_resolution {
        Some(v) => v,
        None => ask_parsed(
            prompt,
            "Enter the source resolution (720p, 1080p, 4k, WxH or all): ",
        )?,
    };
    let min_duration_secs = match args.min_duration_secs {
        Some(v) => v,
        None if ask_duration => ask_parsed(
            prompt,
            "Enter the minimum duration in seconds (0 for all durations): ",
        )?,
        None => 0.0,
    };
    Ok(SelectionCriteria {
        min_size_gib,
        source_resolution,
        min_duration_secs,
    })
}

/// Pick records from `library`, either from `args.dir` or by navigating.
pub fn select_records<P, W>(
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
    let criteria = gather_criteria(args, prompt, false)?;
    select_matching(library, &criteria, args, prompt, out)
}

/// Pick records matching `criteria`, from `args.dir` or by navigating.
pub fn select_matching<P, W>(
    library: Vec<VideoRecord>,
    criteria: &SelectionCriteria,
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
    let root = DirectoryNode::build(library);
    let filter = |r: &VideoRecord| criteria.matches(r);

    let selection = match &args.dir {
        Some(dir) => {
            let node = root
                .find(dir)
                .ok_or_else(|| SelectionError::UnknownDirectory(dir.display().to_string()))?;
            Selection {
                records: node.filter_files(filter, args.recursive),
                recursive: args.recursive,
            }
        }
        None => match navigate(&root, filter, prompt, out)? {
            NavOutcome::Selected(selection) => selection,
            NavOutcome::Quit => return Err(SelectionError::Aborted),
        },
    };

    if selection.is_empty() {
        return Err(SelectionError::NoMatches);
    }
    info!(
        files = selection.len(),
        recursive = selection.recursive,
        "Selection made"
    );
    Ok(selection)
}

/// Output settings; the job limit is only asked for when `ask_concurrency`.
pub fn gather_settings<P>(
    args: &SessionArgs,
    prompt: &mut P,
    ask_concurrency: bool,
) -> io::Result<BatchSettings>
where
    P: Prompt + ?Sized,
{
    let resolution = match &args.resolution {
        Some(v) => v.clone(),
        None => ask_string(prompt, "Enter the output resolution (e.g. 1280x720): ")?,
    };
    let bitrate_kbps = match args.bitrate_kbps {
        Some(v) => v,
        None => ask_parsed(prompt, "Enter the output bitrate in kbps: ")?,
    };
    let max_concurrent = match args.max_concurrent {
        Some(v) => v,
        None if ask_concurrency => {
            ask_parsed(prompt, "Enter the maximum concurrent jobs (0 for automatic): ")?
        }
        None => 0,
    };
    let auto_delete = match args.auto_delete {
        Some(v) => v,
        None => ask_bool(prompt, "Delete originals after transcoding? (true/false): ")?,
    };
    Ok(BatchSettings {
        resolution,
        bitrate_kbps,
        max_concurrent,
        auto_delete,
    })
}
