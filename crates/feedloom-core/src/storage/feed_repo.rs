use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use super::Database;
use crate::feed::{Feed, FeedSource, FeedUpdate, NewFeed};
use crate::{Error, Result};

/// Repository for feed CRUD operations
pub struct FeedRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct FeedRow {
    id: String,
    source_kind: String,
    location: String,
    category: String,
    title: String,
    description: Option<String>,
    site_url: Option<String>,
    refresh_interval_secs: Option<i64>,
    proxy_url: Option<String>,
    last_fetched_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    is_hidden: i32,
    discovery_completed: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    unread_count: i64,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            source: FeedSource::from_parts(&row.source_kind, row.location),
            category: row.category,
            title: row.title,
            description: row.description,
            site_url: row.site_url,
            refresh_interval_secs: row.refresh_interval_secs.map(|s| s.max(0) as u64),
            proxy_url: row.proxy_url,
            last_fetched_at: row.last_fetched_at,
            last_attempt_at: row.last_attempt_at,
            last_error: row.last_error,
            is_hidden: row.is_hidden != 0,
            discovery_completed: row.discovery_completed != 0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            unread_count: row.unread_count.max(0) as u32,
        }
    }
}

const SELECT_FEED: &str = r#"
    SELECT f.id, f.source_kind, f.location, f.category, f.title, f.description, f.site_url,
           f.refresh_interval_secs, f.proxy_url, f.last_fetched_at, f.last_attempt_at,
           f.last_error, f.is_hidden, f.discovery_completed, f.created_at, f.updated_at,
           (SELECT COUNT(*) FROM articles a WHERE a.feed_id = f.id AND a.is_read = 0) AS unread_count
    FROM feeds f
"#;

impl<'a> FeedRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a new feed subscription
    pub async fn create(&self, new_feed: &NewFeed) -> Result<Feed> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO feeds (id, source_kind, location, category, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(new_feed.source.kind())
        .bind(new_feed.source.location())
        .bind(&new_feed.category)
        .bind(&new_feed.title)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| {
            Error::FeedNotFound(id.to_string())
        })
    }

    /// Find a feed by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(&format!("{SELECT_FEED} WHERE f.id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(Feed::from))
    }

    /// Find a feed by URL or script path
    pub async fn find_by_location(&self, location: &str) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(&format!("{SELECT_FEED} WHERE f.location = ?"))
            .bind(location)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(Feed::from))
    }

    /// Get all feeds with unread counts
    pub async fn list_all(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "{SELECT_FEED} ORDER BY f.category ASC, f.title ASC"
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Apply a partial configuration update. Returns false if the feed does not exist.
    pub async fn update(&self, id: Uuid, update: &FeedUpdate) -> Result<bool> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE feeds SET updated_at = ");
        query.push_bind(Utc::now());

        if let Some(title) = &update.title {
            query.push(", title = ").push_bind(title.clone());
        }
        if let Some(category) = &update.category {
            query.push(", category = ").push_bind(category.clone());
        }
        if let Some(location) = &update.location {
            query.push(", location = ").push_bind(location.clone());
        }
        if let Some(interval) = update.refresh_interval_secs {
            let interval = interval
                .map(i64::try_from)
                .transpose()
                .map_err(|_| Error::Validation("Refresh interval out of range".to_string()))?;
            query.push(", refresh_interval_secs = ").push_bind(interval);
        }
        if let Some(proxy) = &update.proxy_url {
            query.push(", proxy_url = ").push_bind(proxy.clone());
        }
        if let Some(hidden) = update.is_hidden {
            query.push(", is_hidden = ").push_bind(hidden as i32);
        }

        query.push(" WHERE id = ").push_bind(id.to_string());

        let result = query.build().execute(self.db.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful fetch attempt that started at `attempt_at`.
    ///
    /// The write is skipped when a newer attempt has already been recorded.
    /// An empty title is filled from the feed document.
    pub async fn record_success(
        &self,
        id: Uuid,
        attempt_at: DateTime<Utc>,
        title: Option<&str>,
        description: Option<&str>,
        site_url: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET title = CASE WHEN title = '' THEN COALESCE(?, title) ELSE title END,
                description = COALESCE(?, description),
                site_url = COALESCE(?, site_url),
                last_fetched_at = ?,
                last_attempt_at = ?,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND (last_attempt_at IS NULL OR last_attempt_at <= ?)
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(site_url)
        .bind(now)
        .bind(attempt_at)
        .bind(now)
        .bind(id.to_string())
        .bind(attempt_at)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed fetch attempt; same staleness rule as [`record_success`](Self::record_success)
    pub async fn record_failure(
        &self,
        id: Uuid,
        attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_error = ?,
                last_attempt_at = ?,
                updated_at = ?
            WHERE id = ? AND (last_attempt_at IS NULL OR last_attempt_at <= ?)
            "#,
        )
        .bind(error)
        .bind(attempt_at)
        .bind(now)
        .bind(id.to_string())
        .bind(attempt_at)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a feed as already crawled by whole-library discovery
    pub async fn set_discovery_completed(&self, id: Uuid, completed: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET discovery_completed = ? WHERE id = ?")
            .bind(completed as i32)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Delete a feed and all its articles
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get total feed count
    pub async fn count(&self) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }
}
