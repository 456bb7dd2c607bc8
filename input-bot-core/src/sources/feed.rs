//! RSS 2.0 and Atom feeds, deserialized with quick-xml.
//!
//! Field renames use local element names: the deserializer drops namespace
//! prefixes, so `<dc:creator>` is matched by `creator`.

use async_trait::async_trait;
use quick_xml::de::{Deserializer, EntityResolver};
use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::BytesText;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

use crate::config::SourceConfig;
use crate::contract::{FetchError, FetchedSource, RawItem, SourceAdapter};
use crate::normalize::{ItemLayout, SlugRule, TimestampFallback};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded")]
    content: Option<String>,
    author: Option<String>,
    creator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<Text>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

/// Element text, ignoring attributes such as `type="html"`.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaGroup {
    description: Option<String>,
    thumbnail: Option<MediaThumbnail>,
}

#[derive(Debug, Deserialize)]
struct MediaThumbnail {
    #[serde(rename = "@url")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "group")]
    media: Option<MediaGroup>,
}

/// Resolves HTML named entities, which feeds routinely use without declaring them.
struct HtmlEntities;

impl EntityResolver for HtmlEntities {
    type Error = Infallible;

    fn capture(&mut self, _doctype: BytesText) -> Result<(), Self::Error> {
        Ok(())
    }

    fn resolve(&self, entity: &str) -> Option<&str> {
        match entity {
            "nbsp" => Some(" "),
            other => resolve_html5_entity(other),
        }
    }
}

fn deserialize<'de, T: Deserialize<'de>>(xml: &'de str, kind: &str) -> Result<T, FetchError> {
    let mut de = Deserializer::from_str_with_resolver(xml, HtmlEntities);
    T::deserialize(&mut de).map_err(|e| FetchError::Parse(format!("{kind}: {e}")))
}

fn insert_opt(item: &mut RawItem, name: &str, value: Option<String>) {
    if let Some(value) = value {
        item.insert(name, value);
    }
}

fn rss_items(rss: Rss) -> FetchedSource {
    let items = rss
        .channel
        .items
        .into_iter()
        .map(|it| {
            let mut item = RawItem::new();
            insert_opt(&mut item, "title", it.title);
            insert_opt(&mut item, "link", it.link);
            insert_opt(&mut item, "pubDate", it.pub_date);
            insert_opt(&mut item, "summary", it.description);
            insert_opt(&mut item, "content", it.content);
            insert_opt(&mut item, "author", it.author.or(it.creator));
            item
        })
        .collect();
    FetchedSource {
        name: rss.channel.title.unwrap_or_default(),
        items,
    }
}

fn atom_items(feed: AtomFeed) -> FetchedSource {
    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let mut item = RawItem::new();
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            insert_opt(&mut item, "id", entry.id);
            insert_opt(&mut item, "title", entry.title.map(|t| t.value));
            insert_opt(&mut item, "link", link);
            insert_opt(&mut item, "published", entry.published);
            insert_opt(&mut item, "updated", entry.updated);
            insert_opt(&mut item, "content", entry.content.map(|t| t.value));
            let authors: Vec<String> = entry.authors.into_iter().filter_map(|a| a.name).collect();
            if !authors.is_empty() {
                item.insert("author", authors);
            }
            let (media_description, thumbnail) = match entry.media {
                Some(group) => (group.description, group.thumbnail),
                None => (None, None),
            };
            insert_opt(
                &mut item,
                "summary",
                entry.summary.map(|t| t.value).or(media_description),
            );
            if let Some(thumbnail) = thumbnail {
                item.insert("media_thumbnail", json!({ "url": thumbnail.url }));
            }
            item
        })
        .collect();
    FetchedSource {
        name: feed.title.map(|t| t.value).unwrap_or_default(),
        items,
    }
}

/// Parses an RSS 2.0 or Atom document into raw items.
pub fn parse_feed(xml: &str) -> Result<FetchedSource, FetchError> {
    if xml.contains("<rss") {
        Ok(rss_items(deserialize(xml, "rss")?))
    } else if xml.contains("<feed") {
        Ok(atom_items(deserialize(xml, "atom")?))
    } else {
        Err(FetchError::Parse(
            "document is neither RSS nor Atom".to_string(),
        ))
    }
}

/// Fetches RSS and Atom feeds; `identifier` is the feed URL.
pub struct FeedAdapter {
    client: Client,
}

impl FeedAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    async fn fetch(&self, source: &SourceConfig) -> Result<FetchedSource, FetchError> {
        let body = super::get_text(&self.client, &source.identifier).await?;
        let fetched = parse_feed(&body)?;
        tracing::info!(
            feed = %source.identifier,
            title = %fetched.name,
            items = fetched.items.len(),
            "Parsed feed"
        );
        Ok(fetched)
    }

    fn layout(&self) -> ItemLayout {
        ItemLayout {
            title_field: "title",
            timestamp_fields: vec!["published", "pubDate", "updated"],
            timestamp_fallback: TimestampFallback::Fail,
            identifier_field: "link",
            slug_rule: SlugRule::LastSegment,
            link_field: Some("link"),
        }
    }
}
