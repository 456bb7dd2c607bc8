//! Citation library items, paged through the group items API.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::SourceConfig;
use crate::contract::{FetchError, FetchedSource, RawItem, SourceAdapter};
use crate::normalize::{ItemLayout, SlugRule, TimestampFallback};

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct Group {
    data: GroupData,
}

#[derive(Debug, Deserialize)]
struct GroupData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LibraryItem {
    key: String,
    data: Map<String, Value>,
}

/// Creator objects become a list of display names (last name, or the single `name` field).
fn flatten_creators(data: &mut Map<String, Value>) {
    let Some(Value::Array(creators)) = data.get("creators") else {
        return;
    };
    let names: Vec<Value> = creators
        .iter()
        .filter_map(|c| {
            c.get("lastName")
                .or_else(|| c.get("name"))
                .and_then(Value::as_str)
                .map(|s| Value::String(s.to_string()))
        })
        .collect();
    data.insert("creators".to_string(), Value::Array(names));
}

fn to_raw_item(item: LibraryItem) -> RawItem {
    let mut data = item.data;
    data.entry("key".to_string())
        .or_insert_with(|| Value::String(item.key));
    flatten_creators(&mut data);
    RawItem::from(data)
}

/// Fetches the top-level items of a citation group library; `identifier` is the group id.
pub struct CitationAdapter {
    client: Client,
    api: String,
}

impl CitationAdapter {
    pub fn new(client: Client, api: &str) -> Self {
        Self {
            client,
            api: api.trim_end_matches('/').to_string(),
        }
    }

    fn items_url(&self, group: &str, tag: Option<&str>, start: usize) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/groups/{group}/items/top", self.api))
            .map_err(|e| FetchError::Invalid(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("limit", &PAGE_SIZE.to_string())
            .append_pair("start", &start.to_string());
        if let Some(tag) = tag {
            url.query_pairs_mut().append_pair("tag", tag);
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for CitationAdapter {
    async fn fetch(&self, source: &SourceConfig) -> Result<FetchedSource, FetchError> {
        let group_id = source.identifier.trim();
        let group: Group =
            super::get_json(&self.client, &format!("{}/groups/{group_id}", self.api)).await?;

        let mut items = Vec::new();
        for page in 0..MAX_PAGES {
            let url = self.items_url(group_id, source.tag.as_deref(), page * PAGE_SIZE)?;
            let batch: Vec<LibraryItem> = super::get_json(&self.client, url.as_str()).await?;
            let last_page = batch.len() < PAGE_SIZE;
            items.extend(batch.into_iter().map(to_raw_item));
            if last_page {
                break;
            }
        }

        tracing::info!(
            group = group_id,
            name = %group.data.name,
            items = items.len(),
            tag = source.tag.as_deref().unwrap_or(""),
            "Fetched citation library"
        );
        Ok(FetchedSource {
            name: group.data.name,
            items,
        })
    }

    fn layout(&self) -> ItemLayout {
        ItemLayout {
            title_field: "title",
            timestamp_fields: vec!["dateAdded", "dateModified"],
            timestamp_fallback: TimestampFallback::Fail,
            identifier_field: "key",
            slug_rule: SlugRule::Verbatim,
            link_field: Some("url"),
        }
    }
}
