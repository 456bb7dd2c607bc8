//! High-level pipeline: orchestrates fetch → normalise → publish → batch for all configured sources.
//!
//! One call to [`synchronise`] is one run:
//!   - validates the configuration (fatal, before any network activity)
//!   - builds the [`DedupIndex`] from the repository tree and open pull requests
//!   - fetches every source in order through its [`SourceAdapter`]
//!   - normalises and publishes each item in order into the run's [`ChangeSet`]
//!   - hands all accepted entries to the [`ChangeBatcher`] for one pull request
//!
//! # Error Handling
//! - Configuration and index errors abort the run ([`SyncError`]).
//! - A source that fails to fetch contributes zero items; the run continues.
//! - An item that fails to normalise is skipped; the source continues.
//! - Submission failures are rolled back by the batcher and reported in
//!   [`RunReport::outcome`], never as an `Err`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::batch::{ChangeBatcher, SubmissionOutcome};
use crate::config::{ConfigError, PipelineConfig, SourceKind};
use crate::contract::{Repository, SourceAdapter};
use crate::index::DedupIndex;
use crate::normalize::{folder_name, normalize, ItemError, NormalizeContext};
use crate::publish::{publish, ChangeSet};

/// Adapters by source kind.
#[derive(Default)]
pub struct AdapterSet {
    adapters: HashMap<SourceKind, Box<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SourceKind, adapter: Box<dyn SourceAdapter>) -> Self {
        self.register(kind, adapter);
        self
    }

    pub fn register(&mut self, kind: SourceKind, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn SourceAdapter> {
        self.adapters.get(&kind).map(|a| a.as_ref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read repository state: {0}")]
    Repository(String),
}

/// Per-source counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub identifier: String,
    pub fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    /// Set when the source could not be fetched at all.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    /// Paths known before any item was processed.
    pub index_size_before: usize,
    pub index_size_after: usize,
    pub outcome: SubmissionOutcome,
}

/// Runs the pipeline once.
pub async fn synchronise<R>(
    config: &PipelineConfig,
    adapters: &AdapterSet,
    repository: &R,
    run_started_at: DateTime<Utc>,
) -> Result<RunReport, SyncError>
where
    R: Repository + ?Sized,
{
    config.validate()?;
    info!(
        sources = config.sources.len(),
        root = %config.content_root,
        "[SYNC] Starting run"
    );

    let root = config.content_root.trim_matches('/');
    let tree = repository.list_tree(root).await.map_err(|e| {
        error!(error = %e, "[SYNC][ERROR] Failed to list repository tree");
        SyncError::Repository(e.to_string())
    })?;
    let pending = repository
        .list_open_change_request_paths(root)
        .await
        .map_err(|e| {
            error!(error = %e, "[SYNC][ERROR] Failed to list open pull request files");
            SyncError::Repository(e.to_string())
        })?;
    let mut index = DedupIndex::build(tree, pending, root);
    let index_size_before = index.len();
    info!(known = index_size_before, "[SYNC] Deduplication index ready");

    let mut change_set = ChangeSet::new();
    let mut batcher = ChangeBatcher::new();
    let mut reports = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        let mut report = SourceReport {
            identifier: source.identifier.clone(),
            ..Default::default()
        };

        let Some(adapter) = adapters.get(source.kind) else {
            error!(kind = source.kind.as_str(), identifier = %source.identifier, "[SYNC][ERROR] No adapter registered");
            report.error = Some(format!("no adapter for {}", source.kind.as_str()));
            reports.push(report);
            continue;
        };

        info!(kind = source.kind.as_str(), identifier = %source.identifier, "[SYNC] Fetching source");
        let fetched = match adapter.fetch(source).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(identifier = %source.identifier, error = %e, "[SYNC][ERROR] Fetch failed, skipping source");
                report.error = Some(e.to_string());
                reports.push(report);
                continue;
            }
        };
        report.fetched = fetched.items.len();

        if folder_name(&fetched.name).is_empty() {
            error!(identifier = %source.identifier, "[SYNC][ERROR] Source has no name to derive a folder from");
            report.error = Some("empty source name".to_string());
            reports.push(report);
            continue;
        }

        let layout = adapter.layout();
        let ctx = NormalizeContext {
            run_started_at,
            placeholder_policy: config.placeholder_policy(source),
        };

        for item in &fetched.items {
            let entry = match normalize(item, source, &fetched.name, &layout, &ctx) {
                Ok(entry) => entry,
                Err(ItemError::TooOld { .. }) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(identifier = %source.identifier, error = %e, "[SYNC] Skipping item");
                    report.skipped += 1;
                    continue;
                }
            };
            if publish(&entry, &mut index, &mut change_set) {
                report.accepted += 1;
                batcher.accept(entry);
            } else {
                report.duplicates += 1;
            }
        }

        info!(
            identifier = %source.identifier,
            fetched = report.fetched,
            accepted = report.accepted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "[SYNC] Source processed"
        );
        reports.push(report);
    }

    debug!(staged = change_set.len(), "[SYNC] Finalizing");
    let index_size_after = index.len();
    let outcome = batcher
        .finalize(&change_set, config, run_started_at, repository)
        .await;

    Ok(RunReport {
        sources: reports,
        index_size_before,
        index_size_after,
        outcome,
    })
}

impl RunReport {
    pub fn accepted(&self) -> usize {
        self.sources.iter().map(|s| s.accepted).sum()
    }
}

