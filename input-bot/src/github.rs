#![doc = "GitHub-backed implementation of the core's `Repository` contract."]
//
//! # Repository client (CLI <-> GitHub)
//!
//! [`GithubClient`] speaks the GitHub REST API directly through `reqwest`:
//!
//! | operation                        | endpoint                                              |
//! |----------------------------------|-------------------------------------------------------|
//! | `list_tree`                      | `GET /repos/{repo}/git/trees/{base}?recursive=1`      |
//! | `list_open_change_request_paths` | `GET /repos/{repo}/pulls?state=open`, then `/files`   |
//! | `create_branch`                  | `GET .../git/ref/heads/{base}`, `POST .../git/refs`   |
//! | `stage_file`                     | `PUT /repos/{repo}/contents/{path}`                   |
//! | `open_change_request`            | `POST /repos/{repo}/pulls`                            |
//! | `delete_branch`                  | `DELETE /repos/{repo}/git/refs/heads/{branch}`        |
//!
//! Construct it with [`GithubClient::new_from_env`] (`GITHUB_TOKEN`, optional
//! `GITHUB_API_URL`).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::try_join_all;
use input_bot_core::contract::{BranchHandle, ChangeRequest, CollaboratorError, Repository};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::env;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 30;

#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PullSummary {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPull {
    number: u64,
    html_url: String,
}

fn under_root(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

pub struct GithubClient {
    client: Client,
    api: Url,
    owner: String,
    name: String,
    base_branch: String,
    token: String,
}

impl GithubClient {
    pub fn new(
        client: Client,
        api: &str,
        repository: &str,
        base_branch: &str,
        token: &str,
    ) -> Result<Self, CollaboratorError> {
        let api = Url::parse(api)?;
        if api.cannot_be_a_base() {
            return Err(format!("GitHub API URL {api} cannot be used as a base").into());
        }
        let (owner, name) = repository
            .split_once('/')
            .ok_or_else(|| format!("repository must be owner/name, got {repository:?}"))?;
        Ok(Self {
            client,
            api,
            owner: owner.to_string(),
            name: name.to_string(),
            base_branch: base_branch.to_string(),
            token: token.to_string(),
        })
    }

    /// Reads `GITHUB_TOKEN` (required) and `GITHUB_API_URL` (optional) from the environment.
    pub fn new_from_env(
        client: Client,
        repository: &str,
        base_branch: &str,
    ) -> Result<Self, CollaboratorError> {
        let token = match env::var("GITHUB_TOKEN") {
            Ok(token) if !token.trim().is_empty() => token,
            _ => {
                tracing::error!("GITHUB_TOKEN missing in environment");
                return Err("GITHUB_TOKEN must be set".into());
            }
        };
        let api = env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let github = Self::new(client, &api, repository, base_branch, &token)?;
        tracing::info!(
            api = %github.api,
            repository,
            base_branch,
            "Initialized GithubClient from environment"
        );
        Ok(github)
    }

    /// `{api}/repos/{owner}/{name}/{segments...}`, each segment percent-encoded.
    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, CollaboratorError> {
        let mut url = self.api.clone();
        url.path_segments_mut()
            .map_err(|_| format!("GitHub API URL {} cannot be used as a base", self.api))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.name.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, CollaboratorError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let url = resp.url().clone();
        let body = resp.text().await.unwrap_or_default();
        tracing::error!(%url, %status, body = %body, "GitHub API request failed");
        Err(format!("GitHub API {url} returned {status}: {body}").into())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CollaboratorError> {
        let resp = self.send(self.request(Method::GET, url)).await?;
        Ok(resp.json::<T>().await?)
    }

    /// Follows `page=` until a page comes back shorter than `per_page`.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, CollaboratorError> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .extend_pairs(query)
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            let batch: Vec<T> = self.get_json(page_url).await?;
            let last_page = batch.len() < PER_PAGE;
            all.extend(batch);
            if last_page {
                break;
            }
        }
        Ok(all)
    }

    async fn pull_files(&self, number: u64) -> Result<Vec<String>, CollaboratorError> {
        let number = number.to_string();
        let url = self.endpoint(["pulls", number.as_str(), "files"])?;
        let files: Vec<PullFile> = self.get_paged(url, &[]).await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }
}

#[async_trait]
impl Repository for GithubClient {
    async fn list_tree(&self, root: &str) -> Result<Vec<String>, CollaboratorError> {
        let mut url = self.endpoint(["git", "trees", self.base_branch.as_str()])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let tree: Tree = self.get_json(url).await?;
        if tree.truncated {
            tracing::warn!(
                entries = tree.tree.len(),
                "Repository tree listing was truncated; deduplication may miss paths"
            );
        }
        let paths: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && under_root(&entry.path, root))
            .map(|entry| entry.path)
            .collect();
        tracing::info!(root, files = paths.len(), "Listed repository tree");
        Ok(paths)
    }

    async fn list_open_change_request_paths(
        &self,
        root: &str,
    ) -> Result<Vec<String>, CollaboratorError> {
        let pulls: Vec<PullSummary> = self
            .get_paged(self.endpoint(["pulls"])?, &[("state", "open")])
            .await?;
        let per_pull = try_join_all(pulls.iter().map(|pull| self.pull_files(pull.number))).await?;
        let paths: Vec<String> = per_pull
            .into_iter()
            .flatten()
            .filter(|path| under_root(path, root))
            .collect();
        tracing::info!(
            open_pulls = pulls.len(),
            files = paths.len(),
            "Listed files of open pull requests"
        );
        Ok(paths)
    }

    async fn create_branch(&self, name: &str) -> Result<BranchHandle, CollaboratorError> {
        let base: GitRef = self
            .get_json(self.endpoint(["git", "ref", "heads", self.base_branch.as_str()])?)
            .await?;
        let req = self
            .request(Method::POST, self.endpoint(["git", "refs"])?)
            .json(&json!({ "ref": format!("refs/heads/{name}"), "sha": &base.object.sha }));
        self.send(req).await?;
        tracing::info!(branch = name, base = %self.base_branch, sha = %base.object.sha, "Created branch");
        Ok(BranchHandle {
            name: name.to_string(),
        })
    }

    async fn stage_file(
        &self,
        branch: &BranchHandle,
        path: &str,
        content: &str,
    ) -> Result<(), CollaboratorError> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let req = self
            .request(Method::PUT, self.endpoint(segments)?)
            .json(&json!({
                "message": format!("Add {path}"),
                "content": STANDARD.encode(content.as_bytes()),
                "branch": branch.name,
            }));
        self.send(req).await?;
        tracing::debug!(branch = %branch.name, path, "Committed file");
        Ok(())
    }

    async fn open_change_request(
        &self,
        branch: &BranchHandle,
        title: &str,
        body: &str,
    ) -> Result<ChangeRequest, CollaboratorError> {
        let req = self
            .request(Method::POST, self.endpoint(["pulls"])?)
            .json(&json!({
                "title": title,
                "body": body,
                "head": branch.name,
                "base": self.base_branch,
            }));
        let created: CreatedPull = self.send(req).await?.json().await?;
        tracing::info!(number = created.number, url = %created.html_url, "Opened pull request");
        Ok(ChangeRequest {
            number: created.number,
            url: created.html_url,
        })
    }

    async fn delete_branch(&self, branch: &BranchHandle) -> Result<(), CollaboratorError> {
        let url = self.endpoint(["git", "refs", "heads", branch.name.as_str()])?;
        self.send(self.request(Method::DELETE, url)).await?;
        tracing::info!(branch = %branch.name, "Deleted branch");
        Ok(())
    }
}
