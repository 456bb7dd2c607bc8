//! Entry publisher: accepts new entries into the run's working change set.

use tracing::{debug, info};

use crate::index::DedupIndex;
use crate::normalize::Entry;

/// One file waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Relative to the content root.
    pub path: String,
    pub content: String,
}

/// Files staged during a run, in staging order. Nothing touches the
/// repository until the batcher submits the set.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    files: Vec<StagedFile>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }
}

/// Stages `entry` unless its path is already known. Returns whether it was accepted.
///
/// The path is recorded in `index` straight away, so the first of two entries
/// sharing a path wins.
pub fn publish(entry: &Entry, index: &mut DedupIndex, change_set: &mut ChangeSet) -> bool {
    let path = entry.canonical_path.as_str();
    if index.contains(path) || change_set.contains(path) {
        debug!(path, title = %entry.title, "Already published, skipping");
        return false;
    }
    index.insert(path);
    change_set.files.push(StagedFile {
        path: path.to_string(),
        content: entry.content.clone(),
    });
    info!(path, title = %entry.title, "Staged new entry");
    true
}
