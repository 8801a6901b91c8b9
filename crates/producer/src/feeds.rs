//! Feed sources
//!
//! Fetches RSS/Atom documents and maps their entries to [`NewsItem`]s.

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_rs::model::{Entry, Feed};
use newsguard_common::NewsItem;
use std::time::Duration;

/// A configured feed the poller sweeps
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn url(&self) -> &str;

    /// Entries in feed order
    async fn fetch(&self) -> Result<Vec<NewsItem>>;
}

/// Feed fetched over HTTP and parsed with `feed-rs`
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// One source per URL sharing a single client
    pub fn from_urls(urls: &[String], timeout: Duration, user_agent: &str) -> Result<Vec<Self>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build feed HTTP client")?;

        Ok(urls
            .iter()
            .map(|url| Self::new(client.clone(), url.clone()))
            .collect())
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Feed fetch failed")?
            .error_for_status()
            .context("Feed returned an error status")?;

        let bytes = resp.bytes().await.context("Failed to read feed body")?;
        let feed = parse_feed(&bytes[..])?;

        Ok(feed_items(&self.url, feed))
    }
}

/// Parse an RSS/Atom document. Entries without their own id take their
/// permalink as id instead of a generated hash.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    feed_rs::parser::Builder::new()
        .id_generator(|links, _title, _base| {
            links
                .first()
                .map(|link| link.href.trim().to_string())
                .unwrap_or_default()
        })
        .build()
        .parse(bytes)
        .context("Failed to parse RSS/Atom feed")
}

/// Map parsed entries to news items. Entries without an id or link are dropped.
pub fn feed_items(url: &str, feed: Feed) -> Vec<NewsItem> {
    let source_name = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());
    let feed_language = feed.language.clone();

    feed.entries
        .into_iter()
        .filter_map(|entry| {
            let external_id = entry_id(&entry)?;
            let image_url = entry_image(&entry);

            Some(NewsItem {
                external_id,
                source_name: source_name.clone(),
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                raw_summary: entry
                    .summary
                    .map(|t| t.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .unwrap_or_default(),
                published_at: entry.published.or(entry.updated),
                language: entry.language.or_else(|| feed_language.clone()),
                image_url,
            })
        })
        .collect()
}

fn entry_id(entry: &Entry) -> Option<String> {
    let id = entry.id.trim();
    if !id.is_empty() {
        return Some(id.to_string());
    }
    entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

fn entry_image(entry: &Entry) -> Option<String> {
    entry.media.iter().find_map(|media| {
        media
            .thumbnails
            .first()
            .map(|t| t.image.uri.clone())
            .or_else(|| {
                media
                    .content
                    .iter()
                    .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            })
    })
}

/// Fixed set of items, for tests
#[cfg(test)]
pub struct StaticFeed {
    pub url: String,
    pub items: Vec<NewsItem>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl FeedSource for StaticFeed {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>> {
        if self.fail {
            anyhow::bail!("feed unavailable");
        }
        Ok(self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>World Wire</title>
    <language>en-gb</language>
    <item>
      <guid>a1</guid>
      <title>Riot breaks out in Lagos</title>
      <description>&lt;p&gt;Police fired tear gas&lt;/p&gt;</description>
      <pubDate>Mon, 06 May 2024 10:00:00 GMT</pubDate>
      <media:thumbnail url="https://img.example.com/a1.jpg"/>
    </item>
    <item>
      <title>Calm weekend</title>
      <link>https://example.com/calm</link>
    </item>
  </channel>
</rss>"#;

    fn parse(xml: &str) -> Feed {
        parse_feed(xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_maps_rss_entries() {
        let items = feed_items("https://example.com/rss", parse(RSS));
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.external_id, "a1");
        assert_eq!(first.source_name, "World Wire");
        assert_eq!(first.title, "Riot breaks out in Lagos");
        assert!(first.raw_summary.contains("Police fired tear gas"));
        assert!(first.published_at.is_some());
        assert_eq!(first.language.as_deref(), Some("en-gb"));
        assert_eq!(first.image_url.as_deref(), Some("https://img.example.com/a1.jpg"));

        assert_eq!(items[1].external_id, "https://example.com/calm");
        assert!(items[1].published_at.is_none());
    }

    #[test]
    fn test_entry_without_guid_or_link_is_dropped() {
        let xml = r#"<rss version="2.0"><channel><title>W</title>
            <item><title>No identity</title></item>
            <item><guid>g1</guid><title>Kept</title></item>
        </channel></rss>"#;
        let items = feed_items("https://example.com/rss", parse(xml));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "g1");
    }

    #[test]
    fn test_source_name_falls_back_to_url() {
        let xml = r#"<rss version="2.0"><channel><item><guid>x</guid><title>t</title></item></channel></rss>"#;
        let items = feed_items("https://example.com/untitled", parse(xml));
        assert_eq!(items[0].source_name, "https://example.com/untitled");
    }
}
