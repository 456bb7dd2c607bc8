//! # contract: collaborator interfaces of the pipeline
//!
//! The pipeline talks to the outside world through two traits:
//! - [`SourceAdapter`]: fetches raw items for one configured source.
//! - [`Repository`]: reads the content repository and submits one pull request.
//!
//! Both are annotated for `mockall` so tests can drive the whole pipeline
//! without network access. Concrete adapters live in [`crate::sources`]; the
//! GitHub implementation of [`Repository`] lives in the CLI crate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use mockall::automock;

use crate::config::SourceConfig;
use crate::normalize::ItemLayout;

/// Error type for repository operations (boxed, as any backend may fail in its own way).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// A source item as a bag of named fields.
///
/// Adapters decide the field names; the pipeline only looks them up by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    fields: Map<String, Value>,
}

impl RawItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Non-empty, trimmed string value of `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

impl From<Map<String, Value>> for RawItem {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Everything one source produced in a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSource {
    /// Human-readable source name (feed title, group name, catalog host);
    /// becomes the folder name.
    pub name: String,
    pub items: Vec<RawItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid source: {0}")]
    Invalid(String),
}

/// Fetches raw items for one configured source.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch all items currently offered by `source`.
    async fn fetch(&self, source: &SourceConfig) -> Result<FetchedSource, FetchError>;

    /// Where title, date and identifier live on this adapter's items.
    fn layout(&self) -> ItemLayout;
}

/// A branch created for this run's pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHandle {
    pub name: String,
}

/// An opened pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub number: u64,
    pub url: String,
}

/// Read access to the content repository plus the operations needed to submit
/// one pull request.
///
/// The trait is implemented by the GitHub client and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// All file paths under `root` on the default branch.
    async fn list_tree(&self, root: &str) -> Result<Vec<String>, CollaboratorError>;

    /// All file paths under `root` touched by currently open pull requests.
    async fn list_open_change_request_paths(
        &self,
        root: &str,
    ) -> Result<Vec<String>, CollaboratorError>;

    /// Create a branch named `name` off the default branch.
    async fn create_branch(&self, name: &str) -> Result<BranchHandle, CollaboratorError>;

    /// Commit `content` at `path` on `branch`.
    async fn stage_file(
        &self,
        branch: &BranchHandle,
        path: &str,
        content: &str,
    ) -> Result<(), CollaboratorError>;

    /// Open a pull request from `branch` into the default branch.
    async fn open_change_request(
        &self,
        branch: &BranchHandle,
        title: &str,
        body: &str,
    ) -> Result<ChangeRequest, CollaboratorError>;

    async fn delete_branch(&self, branch: &BranchHandle) -> Result<(), CollaboratorError>;
}
