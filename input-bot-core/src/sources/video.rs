//! Video channel uploads, read from the site's per-channel Atom feed.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::SourceConfig;
use crate::contract::{FetchError, FetchedSource, SourceAdapter};
use crate::normalize::{ItemLayout, SlugRule, TimestampFallback};

/// Channel id from either a bare id (`UC…`) or a `…/channel/UC…` URL.
pub fn channel_id(identifier: &str) -> Option<&str> {
    let identifier = identifier.trim().trim_end_matches('/');
    if !identifier.contains('/') {
        return (!identifier.is_empty()).then_some(identifier);
    }
    let (_, rest) = identifier.split_once("/channel/")?;
    let id = rest.split(['/', '?']).next()?;
    (!id.is_empty()).then_some(id)
}

/// Fetches a video channel's upload feed; `identifier` is the channel.
pub struct VideoAdapter {
    client: Client,
    site: String,
}

impl VideoAdapter {
    pub fn new(client: Client, site: &str) -> Self {
        Self {
            client,
            site: site.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for VideoAdapter {
    async fn fetch(&self, source: &SourceConfig) -> Result<FetchedSource, FetchError> {
        let id = channel_id(&source.identifier).ok_or_else(|| {
            FetchError::Invalid(format!(
                "cannot resolve a channel id from {:?}",
                source.identifier
            ))
        })?;
        let url = format!("{}/feeds/videos.xml?channel_id={id}", self.site);
        let body = super::get_text(&self.client, &url).await?;
        let fetched = super::parse_feed(&body)?;
        tracing::info!(
            channel = id,
            title = %fetched.name,
            videos = fetched.items.len(),
            "Parsed channel feed"
        );
        Ok(fetched)
    }

    fn layout(&self) -> ItemLayout {
        ItemLayout {
            title_field: "title",
            timestamp_fields: vec!["published", "updated"],
            timestamp_fallback: TimestampFallback::Fail,
            identifier_field: "link",
            slug_rule: SlugRule::VideoId,
            link_field: Some("link"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use serde_json::json;

    const CHANNEL_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <title>Galaxy Project</title>
 <entry>
  <id>yt:video:abc123</id>
  <yt:videoId>abc123</yt:videoId>
  <title>Intro to Galaxy</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
  <published>2024-05-10T12:00:00+00:00</published>
  <updated>2024-05-11T12:00:00+00:00</updated>
  <media:group>
   <media:title>Intro to Galaxy</media:title>
   <media:thumbnail url="https://i.ytimg.com/vi/abc123/hqdefault.jpg" width="480" height="360"/>
   <media:description>A first look.</media:description>
  </media:group>
 </entry>
</feed>"#;

    #[test]
    fn resolves_channel_ids() {
        assert_eq!(channel_id("UCabc"), Some("UCabc"));
        assert_eq!(
            channel_id("https://www.youtube.com/channel/UCabc/videos"),
            Some("UCabc")
        );
        assert_eq!(channel_id("https://www.youtube.com/channel/UCabc/"), Some("UCabc"));
        assert_eq!(channel_id("https://www.youtube.com/@handle"), None);
    }

    #[tokio::test]
    async fn fetches_channel_feed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/feeds/videos.xml"))
            .and(wiremock::matchers::query_param("channel_id", "UCgalaxy"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(CHANNEL_FEED))
            .mount(&server)
            .await;

        let adapter = VideoAdapter::new(Client::new(), &server.uri());
        let source = SourceConfig {
            kind: SourceKind::Video,
            identifier: "https://www.youtube.com/channel/UCgalaxy".into(),
            format: "{title} {media_thumbnail}".into(),
            media: vec![],
            mentions: vec![],
            hashtags: vec![],
            tag: None,
            max_age_days: None,
            missing_placeholder: None,
        };
        let fetched = adapter.fetch(&source).await.unwrap();
        assert_eq!(fetched.name, "Galaxy Project");
        let video = &fetched.items[0];
        assert_eq!(video.get_str("link"), Some("https://www.youtube.com/watch?v=abc123"));
        assert_eq!(video.get_str("summary"), Some("A first look."));
        assert_eq!(
            video.get("media_thumbnail"),
            Some(&json!({"url": "https://i.ytimg.com/vi/abc123/hqdefault.jpg"}))
        );
    }

    #[tokio::test]
    async fn unresolvable_channel_is_invalid() {
        let adapter = VideoAdapter::new(Client::new(), "http://127.0.0.1:9");
        let source = SourceConfig {
            kind: SourceKind::Video,
            identifier: "https://www.youtube.com/@handle".into(),
            format: "{title}".into(),
            media: vec![],
            mentions: vec![],
            hashtags: vec![],
            tag: None,
            max_age_days: None,
            missing_placeholder: None,
        };
        assert!(matches!(
            adapter.fetch(&source).await,
            Err(FetchError::Invalid(_))
        ));
    }
}
