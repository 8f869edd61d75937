//! Directory index over a flat set of video records.
//!
//! Records are grouped into a tree of [`DirectoryNode`]s rooted at the
//! deepest directory shared by every record. Children are kept in a
//! `BTreeMap` so listing and traversal order is stable across runs.

use crate::record::VideoRecord;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// One filesystem directory in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryNode {
    pub name: String,
    pub path: PathBuf,
    pub children: BTreeMap<String, DirectoryNode>,
    /// Records located directly in this directory, in insertion order
    pub records: Vec<VideoRecord>,
}

impl DirectoryNode {
    /// Create an empty node for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path,
            children: BTreeMap::new(),
            records: Vec::new(),
        }
    }

    /// Build the index for `records`, rooted at their common base directory.
    pub fn build(records: impl IntoIterator<Item = VideoRecord>) -> Self {
        let records: Vec<VideoRecord> = records.into_iter().collect();
        let base = common_base_dir(&records);
        let mut root = DirectoryNode::new(base);
        for record in records {
            let path = record.path.clone();
            if !root.insert(record) {
                warn!(path = %path.display(), base = %root.path.display(), "Record outside library tree dropped");
            }
        }
        root
    }

    /// Place `record` at the node matching its location, creating
    /// intermediate nodes. Returns `false` if the record lies outside this
    /// node's subtree.
    pub fn insert(&mut self, record: VideoRecord) -> bool {
        let Ok(relative) = record.location.strip_prefix(&self.path) else {
            return false;
        };
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let mut current = self;
        for part in parts {
            let child_path = current.path.join(&part);
            current = current
                .children
                .entry(part)
                .or_insert_with(|| DirectoryNode::new(child_path));
        }
        current.records.push(record);
        true
    }

    /// Child directory names in display order.
    pub fn child_names(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }

    /// Find the node for an absolute directory path inside this subtree.
    pub fn find(&self, path: &Path) -> Option<&DirectoryNode> {
        let relative = path.strip_prefix(&self.path).ok()?;
        let mut current = self;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    current = current.children.get(part.to_string_lossy().as_ref())?;
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(current)
    }

    /// Walk a sequence of child names from this node.
    pub fn descend<'a, I>(&self, names: I) -> Option<&DirectoryNode>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut current = self;
        for name in names {
            current = current.children.get(name)?;
        }
        Some(current)
    }

    /// Records in this node, and with `recursive` every descendant in
    /// pre-order, that satisfy `predicate`.
    pub fn filter_files<F>(&self, predicate: F, recursive: bool) -> Vec<VideoRecord>
    where
        F: Fn(&VideoRecord) -> bool,
    {
        let mut out = Vec::new();
        self.collect_into(&predicate, recursive, &mut out);
        out
    }

    fn collect_into<F>(&self, predicate: &F, recursive: bool, out: &mut Vec<VideoRecord>)
    where
        F: Fn(&VideoRecord) -> bool,
    {
        out.extend(self.records.iter().filter(|r| predicate(r)).cloned());
        if recursive {
            for child in self.children.values() {
                child.collect_into(predicate, true, out);
            }
        }
    }

    /// Total record count in this subtree.
    pub fn total_records(&self) -> usize {
        self.records.len()
            + self
                .children
                .values()
                .map(DirectoryNode::total_records)
                .sum::<usize>()
    }
}

/// Deepest directory that contains every record's location.
///
/// Starts from the first record's directory and walks it upward until each
/// record lies beneath it. Falls back to `/`.
pub fn common_base_dir(records: &[VideoRecord]) -> PathBuf {
    let root = PathBuf::from("/");
    let Some(first) = records.first() else {
        return root;
    };

    let mut base = first.location.clone();
    for record in records {
        while !record.location.starts_with(&base) {
            match base.parent() {
                Some(parent) => base = parent.to_path_buf(),
                None => return root,
            }
        }
    }

    if base.as_os_str().is_empty() {
        root
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn record(path: &str) -> VideoRecord {
        VideoRecord::from_path(path)
    }

    fn sample_library() -> Vec<VideoRecord> {
        vec![
            record("/lib/a/one.mkv"),
            record("/lib/a/two.mkv"),
            record("/lib/b/three.mp4"),
        ]
    }

    #[test]
    fn test_common_base_dir_siblings() {
        assert_eq!(common_base_dir(&sample_library()), PathBuf::from("/lib"));
    }

    #[test]
    fn test_common_base_dir_is_component_wise() {
        let records = vec![record("/media/tv/x.mkv"), record("/media/tvshows/y.mkv")];
        assert_eq!(common_base_dir(&records), PathBuf::from("/media"));
    }

    #[test]
    fn test_common_base_dir_falls_back_to_root() {
        let records = vec![record("/srv/a.mkv"), record("/mnt/b.mkv")];
        assert_eq!(common_base_dir(&records), PathBuf::from("/"));
        assert_eq!(common_base_dir(&[]), PathBuf::from("/"));
    }

    #[test]
    fn test_build_places_records_in_their_directory() {
        let root = DirectoryNode::build(sample_library());
        assert_eq!(root.path, PathBuf::from("/lib"));
        assert!(root.records.is_empty());
        assert_eq!(root.child_names(), vec!["a", "b"]);
        assert_eq!(root.children["a"].records.len(), 2);
        assert_eq!(root.children["b"].records.len(), 1);
        assert_eq!(root.children["b"].path, PathBuf::from("/lib/b"));
    }

    #[test]
    fn test_recursive_selection_from_root_yields_all_in_order() {
        let root = DirectoryNode::build(sample_library());
        let selected = root.filter_files(|_| true, true);
        let names: Vec<&str> = selected.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one.mkv", "two.mkv", "three.mp4"]);
    }

    #[test]
    fn test_non_recursive_selection_from_root_is_empty() {
        let root = DirectoryNode::build(sample_library());
        assert!(root.filter_files(|_| true, false).is_empty());
    }

    #[test]
    fn test_filter_with_no_matches_is_empty() {
        let root = DirectoryNode::build(sample_library());
        assert!(root.filter_files(|r| r.extension == ".avi", true).is_empty());
    }

    #[test]
    fn test_find_and_descend() {
        let root = DirectoryNode::build(vec![record("/lib/a/deep/x.mkv"), record("/lib/b/y.mkv")]);
        let deep = root.find(Path::new("/lib/a/deep")).expect("node exists");
        assert_eq!(deep.records.len(), 1);
        assert!(root.find(Path::new("/lib/c")).is_none());
        assert!(root.find(Path::new("/other")).is_none());
        assert_eq!(root.find(Path::new("/lib")), Some(&root));

        let names = vec!["a".to_string(), "deep".to_string()];
        assert_eq!(root.descend(&names), Some(deep));
    }

    #[test]
    fn test_insert_outside_subtree_is_rejected() {
        let mut root = DirectoryNode::new("/lib");
        assert!(!root.insert(record("/elsewhere/x.mkv")));
        assert_eq!(root.total_records(), 0);
    }

    #[test]
    fn test_build_drops_relative_record_among_absolute() {
        let root = DirectoryNode::build(vec![record("lib/x.mkv"), record("/srv/y.mkv")]);
        assert_eq!(root.path, PathBuf::from("/"));
        assert_eq!(root.total_records(), 1);
        assert!(root.find(Path::new("/srv")).is_some());
    }

    fn library_strategy() -> impl Strategy<Value = Vec<VideoRecord>> {
        prop::collection::vec(
            (
                prop::collection::vec("[a-d]{1,2}", 0..4),
                "[a-z]{1,8}",
            ),
            0..30,
        )
        .prop_map(|entries| {
            let mut seen = HashSet::new();
            entries
                .into_iter()
                .enumerate()
                .filter_map(|(i, (dirs, stem))| {
                    let mut path = PathBuf::from("/vol");
                    for d in dirs {
                        path.push(d);
                    }
                    path.push(format!("{}-{}.mkv", stem, i));
                    seen.insert(path.clone()).then(|| VideoRecord::from_path(path))
                })
                .collect()
        })
    }

    // Every record lands in exactly one node and a recursive, match-all
    // filter from the root returns exactly the input set.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_build_preserves_every_record(records in library_strategy()) {
            let root = DirectoryNode::build(records.clone());

            prop_assert_eq!(root.total_records(), records.len());

            let selected: HashSet<PathBuf> = root
                .filter_files(|_| true, true)
                .into_iter()
                .map(|r| r.path)
                .collect();
            let expected: HashSet<PathBuf> = records.iter().map(|r| r.path.clone()).collect();
            prop_assert_eq!(selected, expected);
        }

        #[test]
        fn prop_non_recursive_never_returns_descendants(records in library_strategy()) {
            let root = DirectoryNode::build(records);
            let mut stack = vec![&root];
            while let Some(node) = stack.pop() {
                for r in node.filter_files(|_| true, false) {
                    prop_assert_eq!(&r.location, &node.path);
                }
                stack.extend(node.children.values());
            }
        }

        #[test]
        fn prop_filter_is_deterministic(records in library_strategy()) {
            let root = DirectoryNode::build(records);
            let first = root.filter_files(|r| r.name.len() % 2 == 0, true);
            let second = root.filter_files(|r| r.name.len() % 2 == 0, true);
            prop_assert_eq!(first, second);
        }
    }
}
