//! Tools listed in a server's tool panel.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Map, Value};

use crate::config::SourceConfig;
use crate::contract::{FetchError, FetchedSource, RawItem, SourceAdapter};
use crate::normalize::{ItemLayout, SlugRule, TimestampFallback};

/// Host part of a catalog URL, used as the source name.
fn catalog_name(url: &str) -> &str {
    let without_scheme = url.rsplit("//").next().unwrap_or(url);
    without_scheme.trim_end_matches('/')
}

fn tool_link(base: &str, tool_id: &str) -> Result<String, FetchError> {
    let mut url =
        Url::parse(&format!("{base}/root")).map_err(|e| FetchError::Invalid(e.to_string()))?;
    url.query_pairs_mut().append_pair("tool_id", tool_id);
    Ok(url.into())
}

/// Flattens the sections of a tool panel into tool items, skipping labels.
fn tools_from_panel(base: &str, panel: Vec<Value>) -> Result<Vec<RawItem>, FetchError> {
    let mut items = Vec::new();
    for section in panel {
        if section.get("model_class").and_then(Value::as_str) != Some("ToolSection") {
            continue;
        }
        let section_name = section
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(Value::Array(elems)) = section.get("elems") else {
            continue;
        };
        for elem in elems {
            let Value::Object(fields) = elem else {
                continue;
            };
            if fields.get("model_class").and_then(Value::as_str) == Some("ToolSectionLabel") {
                continue;
            }
            let mut fields: Map<String, Value> = fields.clone();
            if let Some(id) = fields.get("id").and_then(Value::as_str) {
                let link = tool_link(base, id)?;
                fields.insert("link".to_string(), Value::String(link));
            }
            fields.insert("section".to_string(), Value::String(section_name.clone()));
            items.push(RawItem::from(fields));
        }
    }
    Ok(items)
}

/// Fetches the tool panel of a Galaxy-style server; `identifier` is the server URL.
pub struct ToolAdapter {
    client: Client,
}

impl ToolAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for ToolAdapter {
    async fn fetch(&self, source: &SourceConfig) -> Result<FetchedSource, FetchError> {
        let base = source.identifier.trim().trim_end_matches('/');
        let panel: Vec<Value> =
            super::get_json(&self.client, &format!("{base}/api/tools")).await?;
        let items = tools_from_panel(base, panel)?;
        tracing::info!(catalog = base, tools = items.len(), "Fetched tool panel");
        Ok(FetchedSource {
            name: catalog_name(base).to_string(),
            items,
        })
    }

    fn layout(&self) -> ItemLayout {
        ItemLayout {
            title_field: "name",
            timestamp_fields: vec![],
            timestamp_fallback: TimestampFallback::RunDate,
            identifier_field: "id",
            slug_rule: SlugRule::ToolId,
            link_field: Some("link"),
        }
    }
}
