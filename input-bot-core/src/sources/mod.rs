//! Source adapters: one [`SourceAdapter`] per [`SourceKind`].
//!
//! Adapters only fetch and flatten; everything after that is the pipeline's job.
//! Each adapter declares an [`ItemLayout`](crate::normalize::ItemLayout)
//! naming the fields its items carry.

mod citation;
mod feed;
mod tool;
mod video;

pub use citation::CitationAdapter;
pub use feed::{parse_feed, FeedAdapter};
pub use tool::ToolAdapter;
pub use video::{channel_id, VideoAdapter};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SourceKind;
use crate::contract::FetchError;
use crate::synchronise::AdapterSet;

/// Base URLs of the hosted services behind the citation and video adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub citation_api: String,
    pub video_site: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            citation_api: "https://api.zotero.org".to_string(),
            video_site: "https://www.youtube.com".to_string(),
        }
    }
}

/// HTTP client shared by all adapters.
pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("input-bot/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// One adapter per source kind, all sharing `client`.
pub fn default_adapters(client: Client, endpoints: &Endpoints) -> AdapterSet {
    AdapterSet::new()
        .with(SourceKind::Feed, Box::new(FeedAdapter::new(client.clone())))
        .with(
            SourceKind::Video,
            Box::new(VideoAdapter::new(client.clone(), &endpoints.video_site)),
        )
        .with(
            SourceKind::Citation,
            Box::new(CitationAdapter::new(client.clone(), &endpoints.citation_api)),
        )
        .with(SourceKind::Tool, Box::new(ToolAdapter::new(client)))
}

pub(crate) async fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        tracing::warn!(%url, %status, "Source returned an error status");
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(resp.text().await?)
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
) -> Result<T, FetchError> {
    let body = get_text(client, url).await?;
    serde_json::from_str(&body).map_err(|e| FetchError::Parse(format!("{url}: {e}")))
}
