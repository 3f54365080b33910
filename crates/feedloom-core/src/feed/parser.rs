use chrono::{DateTime, Utc};
use feed_rs::parser;

use crate::{Error, Result};

/// Parsed feed data from RSS/Atom/JSON Feed content
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// One entry of a parsed feed, not yet tied to a stored feed
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub guid: String,
    /// Entry link, or the guid when the entry has no link
    pub link: String,
    pub title: String,
    pub author: Option<String>,
    pub content_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parse RSS/Atom feed content into structured data
pub fn parse_feed(content: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(content)
        .map_err(|e| Error::FeedParse(e.to_string()))?;

    let title = feed.title.map(|t| t.content);
    let description = feed.description.map(|d| d.content);

    // Prefer the alternate (HTML) link over rel="self"
    let site_url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .or_else(|| feed.links.first())
        .map(|l| l.href.clone());

    let items = feed.entries.into_iter().map(|entry| {
        let guid = entry.id;

        let link = entry.links.first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| guid.clone());

        let title = entry.title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let author = entry.authors.first().map(|a| a.name.clone());

        let content_text = entry.content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .map(|html| html_to_text(&html));

        let published_at = entry.published
            .or(entry.updated)
            .map(|dt| DateTime::<Utc>::from(dt));

        ParsedItem {
            guid,
            link,
            title,
            author,
            content_text,
            published_at,
        }
    }).collect();

    Ok(ParsedFeed {
        title,
        description,
        site_url,
        items,
    })
}

/// Convert HTML content to plain text
fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80)
        .unwrap_or_else(|_| html.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <description>Things</description>
    <item>
      <guid>post-1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1?utm_source=rss</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <guid>post-2</guid>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example Blog"));
        assert_eq!(parsed.description.as_deref(), Some("Things"));
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.title, "First Post");
        assert_eq!(first.link, "https://example.com/post/1?utm_source=rss");
        assert!(first.published_at.is_some());
        assert!(first.content_text.as_deref().unwrap().contains("Hello"));
    }

    #[test]
    fn test_item_without_link_falls_back_to_guid() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let second = &parsed.items[1];
        assert_eq!(second.title, "Untitled");
        assert_eq!(second.link, second.guid);
    }

    #[test]
    fn test_parse_rejects_html() {
        let err = parse_feed(b"<html><body>nope</body></html>").unwrap_err();
        assert!(matches!(err, Error::FeedParse(_)));
    }
}
