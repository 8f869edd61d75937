//! Interactive directory navigation over a [`DirectoryNode`] tree.

use crate::index::DirectoryNode;
use crate::prompt::Prompt;
use crate::record::VideoRecord;
use crate::selection::Selection;
use std::io::{self, Write};

/// Result of a navigation session.
#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    /// Operator picked a directory; the selection may be empty.
    Selected(Selection),
    /// Operator quit without choosing.
    Quit,
}

/// One parsed menu choice.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Choice {
    ThisDirectory,
    Recursive,
    Up,
    Enter(usize),
    Quit,
    Invalid,
}

const FIRST_CHILD_INDEX: usize = 4;

fn parse_choice(input: &str, child_count: usize) -> Choice {
    match input.trim() {
        "q" | "Q" => Choice::Quit,
        "1" => Choice::ThisDirectory,
        "2" => Choice::Recursive,
        "3" => Choice::Up,
        other => match other.parse::<usize>() {
            Ok(n) if n >= FIRST_CHILD_INDEX && n - FIRST_CHILD_INDEX < child_count => {
                Choice::Enter(n - FIRST_CHILD_INDEX)
            }
            _ => Choice::Invalid,
        },
    }
}

fn render_menu<W, F>(out: &mut W, node: &DirectoryNode, filter: &F) -> io::Result<()>
where
    W: Write,
    F: Fn(&VideoRecord) -> bool,
{
    writeln!(out)?;
    writeln!(out, "Current directory: {}", node.path.display())?;
    writeln!(out, "[1] Select files in this directory only")?;
    writeln!(out, "[2] Select files in this directory and all subdirectories")?;
    writeln!(out, "[3] Go up one directory")?;
    for (i, name) in node.child_names().iter().enumerate() {
        writeln!(out, "[{}] Enter {}/", i + FIRST_CHILD_INDEX, name)?;
    }
    writeln!(out, "[q] Quit")?;

    let matching = node.filter_files(filter, false);
    if matching.is_empty() {
        writeln!(out, "No eligible video files in this directory.")?;
    } else {
        writeln!(
            out,
            "{} eligible video file(s) in this directory:",
            matching.len()
        )?;
        for record in &matching {
            writeln!(out, "  {} ({:.2} GB, {})", record.name, record.size_gib(), record.resolution())?;
        }
    }
    Ok(())
}

/// Walk the tree with the operator until they select or quit.
///
/// The current position is kept as a list of child names from `root`, so
/// going up is a pop and going up at the root changes nothing. End of input
/// is treated as quit.
pub fn navigate<P, W, F>(
    root: &DirectoryNode,
    filter: F,
    prompt: &mut P,
    out: &mut W,
) -> io::Result<NavOutcome>
where
    P: Prompt + ?Sized,
    W: Write,
    F: Fn(&VideoRecord) -> bool,
{
    let mut trail: Vec<String> = Vec::new();

    loop {
        let node = match root.descend(&trail) {
            Some(node) => node,
            None => {
                trail.clear();
                root
            }
        };

        render_menu(out, node, &filter)?;
        out.flush()?;

        let Some(input) = prompt.read_line("Enter choice: ")? else {
            return Ok(NavOutcome::Quit);
        };

        let names = node.child_names();
        match parse_choice(&input, names.len()) {
            Choice::Quit => return Ok(NavOutcome::Quit),
            Choice::ThisDirectory => {
                return Ok(NavOutcome::Selected(Selection {
                    records: node.filter_files(&filter, false),
                    recursive: false,
                }))
            }
            Choice::Recursive => {
                return Ok(NavOutcome::Selected(Selection {
                    records: node.filter_files(&filter, true),
                    recursive: true,
                }))
            }
            Choice::Up => {
                if trail.pop().is_none() {
                    writeln!(out, "Already at the base directory.")?;
                }
            }
            Choice::Enter(idx) => {
                let name = names[idx].to_string();
                trail.push(name);
            }
            Choice::Invalid => {
                writeln!(out, "Invalid choice '{}'. Please try again.", input)?;
            }
        }
    }
}
