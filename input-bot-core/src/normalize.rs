//! Entry normalisation: turns one [`RawItem`] plus its [`SourceConfig`] into an [`Entry`].
//!
//! Every adapter declares an [`ItemLayout`] telling the normaliser where the
//! title, publication date and identifier live on its items. The normaliser
//! never inspects source-specific fields beyond what the layout names and the
//! placeholders of the source's format template.
//!
//! Normalisation is pure: no I/O, no clock (the run start is passed in).
//! Missing placeholders are logged and handled per [`MissingPlaceholderPolicy`].

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{MissingPlaceholderPolicy, SourceConfig};
use crate::contract::RawItem;

/// What to do when none of the timestamp fields parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFallback {
    /// The item is skipped with [`ItemError::MalformedTimestamp`].
    Fail,
    /// Use the run start date (for sources whose items carry no date).
    RunDate,
}

/// How the file name is derived from an item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugRule {
    /// Last non-empty `/` segment; the one before it when the identifier ends in `/`.
    LastSegment,
    /// [`SlugRule::LastSegment`], keeping only what follows `?v=`.
    VideoId,
    /// Tool shed ids (`host/repos/owner/name/tool/version`) use the segment before
    /// the version; built-in tool ids are used whole.
    ToolId,
    /// The identifier itself.
    Verbatim,
}

/// Where an adapter's items keep the fields the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLayout {
    pub title_field: &'static str,
    /// Tried in order; the first one that parses wins.
    pub timestamp_fields: Vec<&'static str>,
    pub timestamp_fallback: TimestampFallback,
    pub identifier_field: &'static str,
    pub slug_rule: SlugRule,
    /// Field linked from the pull request body.
    pub link_field: Option<&'static str>,
}

/// Per-run inputs of the normaliser.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext {
    pub run_started_at: DateTime<Utc>,
    pub placeholder_policy: MissingPlaceholderPolicy,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("item {title:?} has no identifier")]
    MissingIdentifier { title: String },
    #[error("item {title:?} has no parsable publication date")]
    MalformedTimestamp { title: String },
    #[error("item {title:?} has no field for placeholder {{{placeholder}}}")]
    MissingPlaceholder { title: String, placeholder: String },
    #[error("item {title:?} published {published} is older than {cutoff}")]
    TooOld {
        title: String,
        published: NaiveDate,
        cutoff: NaiveDate,
    },
    #[error("item {title:?} could not be rendered: {reason}")]
    Render { title: String, reason: String },
}

/// A source item ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub title: String,
    pub published_at: NaiveDate,
    /// `{folder}/{slug}.md`, relative to the content root.
    pub canonical_path: String,
    /// The format template with placeholders substituted.
    pub rendered_body: String,
    /// Front matter followed by `rendered_body`; what ends up in the file.
    pub content: String,
    pub link: Option<String>,
    pub source: Arc<SourceConfig>,
}

#[derive(Serialize)]
struct FrontMatter<'a> {
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    media: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    mentions: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    hashtags: &'a [String],
}

/// `{name}` placeholders; `{{` and `}}` are escaped braces.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("valid placeholder regex")
    })
}

fn markup_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid markup regex"))
}

fn newline_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[ \t]*\r?\n\s*").expect("valid newline regex"))
}

/// Folder name for a source: lowercase, spaces and slashes replaced by `_`.
pub fn folder_name(hint: &str) -> String {
    hint.trim()
        .to_lowercase()
        .replace([' ', '/'], "_")
}

fn last_segment(identifier: &str) -> Option<&str> {
    let mut segments = identifier.rsplit('/');
    match segments.next() {
        Some(last) if !last.is_empty() => Some(last),
        _ => segments.next().filter(|s| !s.is_empty()),
    }
}

/// File name (without extension) for an identifier under `rule`.
pub fn derive_slug(identifier: &str, rule: SlugRule) -> Option<String> {
    let identifier = identifier.trim();
    let slug = match rule {
        SlugRule::LastSegment => last_segment(identifier)?,
        SlugRule::VideoId => {
            let segment = last_segment(identifier)?;
            segment
                .rsplit_once("?v=")
                .map(|(_, id)| id)
                .unwrap_or(segment)
        }
        SlugRule::ToolId => {
            if identifier.contains("toolshed") {
                let mut segments = identifier.rsplit('/');
                segments.next();
                segments.next()?
            } else {
                identifier
            }
        }
        SlugRule::Verbatim => identifier,
    };
    let slug = slug.trim().replace('/', "_");
    (!slug.is_empty()).then_some(slug)
}

/// Parses RFC 3339, RFC 2822, naive ISO date-times and plain `YYYY-MM-DD` dates.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Readable text of a field value. Markup is reduced to its first paragraph.
pub fn text_of(raw: &str) -> String {
    if !markup_regex().is_match(raw) {
        return raw.to_string();
    }
    static PARAGRAPH: OnceCell<Selector> = OnceCell::new();
    let paragraph = PARAGRAPH.get_or_init(|| Selector::parse("p").expect("valid selector"));

    let fragment = Html::parse_fragment(raw);
    let text: String = match fragment.select(paragraph).next() {
        Some(p) => p.text().collect(),
        None => fragment.root_element().text().collect(),
    };
    newline_regex().replace_all(text.trim(), " ").into_owned()
}

fn render_value(value: &Value, title: &str) -> String {
    match value {
        Value::String(s) => text_of(s),
        Value::Array(values) => values
            .iter()
            .map(|v| render_value(v, title))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => match map.get("url").and_then(Value::as_str) {
            Some(url) => format!("![{title}]({url})"),
            None => String::new(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitutes every `{name}` placeholder in `template` with the matching item field.
pub fn render_template(
    template: &str,
    item: &RawItem,
    title: &str,
    policy: MissingPlaceholderPolicy,
) -> Result<String, ItemError> {
    let mut values: HashMap<&str, String> = HashMap::new();
    for caps in placeholder_regex().captures_iter(template) {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if name.trim().is_empty() || values.contains_key(name) {
            continue;
        }
        match item.get(name) {
            Some(value) => {
                values.insert(name, render_value(value, title));
            }
            None => {
                warn!(placeholder = name, title, "Placeholder not found in item");
                match policy {
                    MissingPlaceholderPolicy::Keep => {}
                    MissingPlaceholderPolicy::Blank => {
                        values.insert(name, String::new());
                    }
                    MissingPlaceholderPolicy::Reject => {
                        return Err(ItemError::MissingPlaceholder {
                            title: title.to_string(),
                            placeholder: name.to_string(),
                        });
                    }
                }
            }
        }
    }

    let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures<'_>| {
        match (&caps[0], caps.get(1)) {
            ("{{", _) => "{".to_string(),
            ("}}", _) => "}".to_string(),
            (whole, Some(name)) => values
                .get(name.as_str())
                .cloned()
                .unwrap_or_else(|| whole.to_string()),
            (whole, None) => whole.to_string(),
        }
    });
    Ok(rendered.into_owned())
}

fn front_matter(source: &SourceConfig) -> Result<String, serde_yaml::Error> {
    let header = FrontMatter {
        media: &source.media,
        mentions: &source.mentions,
        hashtags: &source.hashtags,
    };
    if header.media.is_empty() && header.mentions.is_empty() && header.hashtags.is_empty() {
        return Ok("---\n---\n".to_string());
    }
    Ok(format!("---\n{}---\n", serde_yaml::to_string(&header)?))
}

/// Builds the canonical [`Entry`] for one item of a source whose folder hint is `folder_hint`.
pub fn normalize(
    item: &RawItem,
    source: &Arc<SourceConfig>,
    folder_hint: &str,
    layout: &ItemLayout,
    ctx: &NormalizeContext,
) -> Result<Entry, ItemError> {
    let identifier = item.get_str(layout.identifier_field);
    let title = item
        .get_str(layout.title_field)
        .map(text_of)
        .or_else(|| identifier.map(str::to_string))
        .unwrap_or_else(|| "untitled".to_string());

    let published_at = match layout
        .timestamp_fields
        .iter()
        .filter_map(|field| item.get_str(field))
        .find_map(parse_date)
    {
        Some(date) => date,
        None => match layout.timestamp_fallback {
            TimestampFallback::RunDate => ctx.run_started_at.date_naive(),
            TimestampFallback::Fail => return Err(ItemError::MalformedTimestamp { title }),
        },
    };

    let Some(slug) = identifier.and_then(|id| derive_slug(id, layout.slug_rule)) else {
        return Err(ItemError::MissingIdentifier { title });
    };

    if let Some(days) = source.max_age_days {
        let cutoff = ctx
            .run_started_at
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        if published_at < cutoff {
            debug!(%title, %published_at, %cutoff, "Item older than age cutoff");
            return Err(ItemError::TooOld {
                title,
                published: published_at,
                cutoff,
            });
        }
    }

    let rendered_body = render_template(&source.format, item, &title, ctx.placeholder_policy)?;
    let header = front_matter(source).map_err(|e| ItemError::Render {
        title: title.clone(),
        reason: e.to_string(),
    })?;

    Ok(Entry {
        canonical_path: format!("{}/{}.md", folder_name(folder_hint), slug),
        content: format!("{header}{rendered_body}\n"),
        link: layout
            .link_field
            .and_then(|field| item.get_str(field))
            .map(str::to_string),
        title,
        published_at,
        rendered_body,
        source: Arc::clone(source),
    })
}
