use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Which adapter fetches a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS 2.0 or Atom feed.
    Feed,
    /// Citation-manager group library.
    Citation,
    /// Tool catalog of a Galaxy-style server.
    Tool,
    /// Video channel upload feed.
    Video,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Citation => "citation",
            SourceKind::Tool => "tool",
            SourceKind::Video => "video",
        }
    }
}

/// What to do when a template names a field the item does not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPlaceholderPolicy {
    /// Leave `{name}` in the rendered text.
    #[default]
    Keep,
    /// Substitute an empty string.
    Blank,
    /// Skip the item.
    Reject,
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Feed URL, group id, catalog URL or channel, depending on `kind`.
    #[serde(default)]
    pub identifier: String,
    /// Template with `{field}` placeholders.
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Restricts citation libraries to items carrying this tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Items published more than this many days before the run are skipped.
    #[serde(default)]
    pub max_age_days: Option<u32>,
    /// Overrides [`PipelineConfig::missing_placeholder`] for this source.
    #[serde(default)]
    pub missing_placeholder: Option<MissingPlaceholderPolicy>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("source #{index} ({kind}) is missing required field `{field}`")]
    MissingField {
        index: usize,
        kind: &'static str,
        field: &'static str,
    },
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
}

/// Everything the pipeline needs, resolved before the run starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Repository directory all posts live under, e.g. `posts/input_bot`.
    pub content_root: String,
    /// Used in the pull request title and body.
    pub bot_name: String,
    /// Branch names are `{branch_prefix}-{timestamp}`.
    pub branch_prefix: String,
    pub missing_placeholder: MissingPlaceholderPolicy,
    pub sources: Vec<Arc<SourceConfig>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            content_root: "posts/input_bot".to_string(),
            bot_name: "input bot".to_string(),
            branch_prefix: "input-bot-update".to_string(),
            missing_placeholder: MissingPlaceholderPolicy::Keep,
            sources: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Fails on the first source without an identifier or format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_root.trim_matches('/').is_empty() {
            return Err(ConfigError::Empty("content_root"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(ConfigError::Empty("branch_prefix"));
        }
        for (index, source) in self.sources.iter().enumerate() {
            let kind = source.kind.as_str();
            if source.identifier.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    index,
                    kind,
                    field: "identifier",
                });
            }
            if source.format.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    index,
                    kind,
                    field: "format",
                });
            }
        }
        Ok(())
    }

    /// Effective placeholder policy for `source`.
    pub fn placeholder_policy(&self, source: &SourceConfig) -> MissingPlaceholderPolicy {
        source
            .missing_placeholder
            .unwrap_or(self.missing_placeholder)
    }

    pub fn trace_loaded(&self) {
        info!(
            content_root = %self.content_root,
            sources_count = self.sources.len(),
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(identifier: &str, format: &str) -> Arc<SourceConfig> {
        Arc::new(SourceConfig {
            kind: SourceKind::Feed,
            identifier: identifier.into(),
            format: format.into(),
            media: vec![],
            mentions: vec![],
            hashtags: vec![],
            tag: None,
            max_age_days: None,
            missing_placeholder: None,
        })
    }

    #[test]
    fn validate_accepts_complete_sources() {
        let config = PipelineConfig {
            sources: vec![source("https://example.org/feed", "{title}")],
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let config = PipelineConfig {
            sources: vec![
                source("https://example.org/feed", "{title}"),
                source("https://example.org/other", "  "),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingField {
                index: 1,
                kind: "feed",
                field: "format"
            })
        );
    }

    #[test]
    fn validate_rejects_empty_identifier() {
        let config = PipelineConfig {
            sources: vec![source("", "{title}")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField {
                field: "identifier",
                ..
            })
        ));
    }

    #[test]
    fn source_override_wins_over_global_policy() {
        let mut src = (*source("x", "{title}")).clone();
        src.missing_placeholder = Some(MissingPlaceholderPolicy::Reject);
        let config = PipelineConfig::default();
        assert_eq!(
            config.placeholder_policy(&src),
            MissingPlaceholderPolicy::Reject
        );
        src.missing_placeholder = None;
        assert_eq!(config.placeholder_policy(&src), MissingPlaceholderPolicy::Keep);
    }
}
