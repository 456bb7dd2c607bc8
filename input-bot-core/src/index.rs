//! Deduplication index: the canonical paths already published or pending review.

use std::collections::HashSet;
use tracing::debug;

/// Set of canonical paths (relative to the content root) known for this run.
///
/// Built once from repository state, then only grows: the publisher records
/// every path it stages so a later item with the same path is a duplicate.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    paths: HashSet<String>,
}

fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let rest = path.trim_start_matches('/').strip_prefix(root)?;
    let rest = rest.strip_prefix('/')?;
    (!rest.is_empty()).then_some(rest)
}

impl DedupIndex {
    /// Union of the default-branch tree and the files of open pull requests,
    /// keeping only paths under `content_root`.
    pub fn build<T, O>(tree: T, open_change_requests: O, content_root: &str) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        let root = content_root.trim_matches('/');
        let mut index = Self::default();
        let tree = tree.into_iter().map(|p| p.as_ref().to_string());
        let open = open_change_requests
            .into_iter()
            .map(|p| p.as_ref().to_string());
        for path in tree.chain(open) {
            if let Some(relative) = relative_to(&path, root) {
                index.paths.insert(relative.to_string());
            }
        }
        debug!(root, known = index.len(), "Built deduplication index");
        index
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Records `path`; returns `false` if it was already known.
    pub fn insert(&mut self, path: &str) -> bool {
        self.paths.insert(path.to_string())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
