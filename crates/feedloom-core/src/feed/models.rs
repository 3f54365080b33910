use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Largest accepted per-feed refresh interval override (ten years)
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Where a feed's document comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum FeedSource {
    /// Fetched over HTTP(S)
    Url(String),
    /// Produced on stdout by a script under the scripts directory
    Script(String),
}

impl FeedSource {
    pub fn location(&self) -> &str {
        match self {
            FeedSource::Url(url) => url,
            FeedSource::Script(path) => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedSource::Url(_) => "url",
            FeedSource::Script(_) => "script",
        }
    }

    pub fn from_parts(kind: &str, location: String) -> Self {
        match kind {
            "script" => FeedSource::Script(location),
            _ => FeedSource::Url(location),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, FeedSource::Script(_))
    }
}

/// Represents a feed subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub source: FeedSource,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    /// Per-feed override of the global refresh interval
    pub refresh_interval_secs: Option<u64>,
    /// Per-feed proxy, takes precedence over `sync.proxy_url`
    pub proxy_url: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Start time of the most recent attempt whose outcome was recorded
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_hidden: bool,
    pub discovery_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Computed field (not stored in DB)
    #[serde(default)]
    pub unread_count: u32,
}

impl Feed {
    /// Check if the feed has a fetch error
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// Whether a scheduled full refresh should include this feed.
    ///
    /// Feeds without an override follow the scheduler cadence and are always due.
    /// An override too large to add to the last fetch time is never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match (self.refresh_interval_secs, self.last_fetched_at) {
            (Some(secs), Some(last)) => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|interval| last.checked_add_signed(interval))
                .is_some_and(|next| next <= now),
            _ => true,
        }
    }

    /// Human-readable name, falling back to the location for untitled feeds
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            self.source.location()
        } else {
            &self.title
        }
    }
}

/// Data required to create a new feed
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub source: FeedSource,
    pub category: String,
    pub title: String,
}

/// Partial update of a feed's configuration.
///
/// Nullable fields use `Option<Option<T>>`: absent leaves the value alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hidden: Option<bool>,
}

impl FeedUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.category.is_none()
            && self.location.is_none()
            && self.refresh_interval_secs.is_none()
            && self.proxy_url.is_none()
            && self.is_hidden.is_none()
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Represents an article from a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub feed_id: Uuid,
    /// Link as published by the feed
    pub url: String,
    /// Canonical dedup key derived from `url`
    pub url_key: String,
    pub guid: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub content_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_favorite: bool,
    pub is_hidden: bool,
    pub is_read_later: bool,
    /// Filled in by the translation collaborator
    pub translated_title: Option<String>,
    /// Filled in by the summary collaborator
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new article
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: Uuid,
    pub url: String,
    pub url_key: String,
    pub guid: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub content_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Filters for listing stored articles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleFilter {
    #[serde(default)]
    pub feed_id: Option<Uuid>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub favorites_only: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}
