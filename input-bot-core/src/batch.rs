//! Change batcher: turns all entries accepted during a run into one pull request.
//!
//! Submission is all-or-nothing from the repository's point of view: once a
//! branch has been created, any later failure deletes it again before the
//! outcome is reported.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::contract::{BranchHandle, ChangeRequest, CollaboratorError, Repository};
use crate::normalize::Entry;
use crate::publish::ChangeSet;

/// What happened to the run's branch after a failed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchCleanup {
    /// Creating the branch itself failed.
    NotCreated,
    Deleted,
    /// Deleting the branch failed too; it has to be removed by hand.
    DeleteFailed(String),
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Nothing new was accepted; no branch was created.
    NoOp,
    Submitted {
        branch: String,
        change_request: ChangeRequest,
        titles: Vec<String>,
    },
    SubmissionFailed {
        branch: String,
        error: String,
        cleanup: BranchCleanup,
    },
}

impl SubmissionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SubmissionOutcome::SubmissionFailed { .. })
    }
}

/// Pull request title for a run started at `run_started_at`.
pub fn change_request_title(bot_name: &str, run_started_at: DateTime<Utc>) -> String {
    format!(
        "Update from {bot_name} since {}",
        run_started_at.format("%Y-%m-%d")
    )
}

/// Pull request body listing every accepted entry.
pub fn change_request_body(bot_name: &str, entries: &[Entry]) -> String {
    let lines = entries
        .iter()
        .map(|entry| match &entry.link {
            Some(link) => format!("- [{}]({})", entry.title, link),
            None => format!("- {}", entry.title),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("This PR was created automatically by {bot_name}.\n\nItems processed:\n{lines}")
}

pub fn branch_name(prefix: &str, run_started_at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", run_started_at.format("%Y%m%d%H%M%S"))
}

/// Accepted entries of one run, in acceptance order.
#[derive(Debug, Default)]
pub struct ChangeBatcher {
    accepted: Vec<Entry>,
}

impl ChangeBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, entry: Entry) {
        self.accepted.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.accepted
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Submits the staged files as one pull request, or does nothing if no
    /// entry was accepted. Never returns an error: failures are rolled back and
    /// reported as [`SubmissionOutcome::SubmissionFailed`].
    pub async fn finalize<R>(
        self,
        change_set: &ChangeSet,
        config: &PipelineConfig,
        run_started_at: DateTime<Utc>,
        repository: &R,
    ) -> SubmissionOutcome
    where
        R: Repository + ?Sized,
    {
        if self.accepted.is_empty() {
            info!("[BATCH] No new entries, nothing to submit");
            return SubmissionOutcome::NoOp;
        }

        let name = branch_name(&config.branch_prefix, run_started_at);
        let branch = match repository.create_branch(&name).await {
            Ok(branch) => {
                info!(branch = %branch.name, "[BATCH] Created branch");
                branch
            }
            Err(e) => {
                error!(branch = %name, error = %e, "[BATCH][ERROR] create_branch failed");
                return SubmissionOutcome::SubmissionFailed {
                    branch: name,
                    error: e.to_string(),
                    cleanup: BranchCleanup::NotCreated,
                };
            }
        };

        let title = change_request_title(&config.bot_name, run_started_at);
        let body = change_request_body(&config.bot_name, &self.accepted);
        let root = config.content_root.trim_matches('/');

        match submit(repository, &branch, change_set, root, &title, &body).await {
            Ok(change_request) => {
                info!(
                    branch = %branch.name,
                    number = change_request.number,
                    url = %change_request.url,
                    entries = self.accepted.len(),
                    "[BATCH] Opened pull request"
                );
                SubmissionOutcome::Submitted {
                    branch: branch.name,
                    change_request,
                    titles: self.accepted.into_iter().map(|e| e.title).collect(),
                }
            }
            Err(e) => {
                error!(branch = %branch.name, error = %e, "[BATCH][ERROR] Submission failed, deleting branch");
                let cleanup = match repository.delete_branch(&branch).await {
                    Ok(()) => {
                        warn!(branch = %branch.name, "[BATCH] Branch deleted after failed submission");
                        BranchCleanup::Deleted
                    }
                    Err(delete_err) => {
                        error!(branch = %branch.name, error = %delete_err, "[BATCH][ERROR] Failed to delete branch");
                        BranchCleanup::DeleteFailed(delete_err.to_string())
                    }
                };
                SubmissionOutcome::SubmissionFailed {
                    branch: branch.name,
                    error: e.to_string(),
                    cleanup,
                }
            }
        }
    }
}

async fn submit<R>(
    repository: &R,
    branch: &BranchHandle,
    change_set: &ChangeSet,
    root: &str,
    title: &str,
    body: &str,
) -> Result<ChangeRequest, CollaboratorError>
where
    R: Repository + ?Sized,
{
    for file in change_set.files() {
        let path = format!("{root}/{}", file.path);
        repository.stage_file(branch, &path, &file.content).await?;
    }
    repository.open_change_request(branch, title, body).await
}
