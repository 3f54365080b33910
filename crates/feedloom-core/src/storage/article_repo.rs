use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use super::Database;
use crate::feed::{Article, ArticleFilter, NewArticle};
use crate::Result;

/// Repository for article CRUD operations
pub struct ArticleRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct ArticleRow {
    id: String,
    feed_id: String,
    url: String,
    url_key: String,
    guid: Option<String>,
    title: String,
    author: Option<String>,
    content_text: Option<String>,
    published_at: Option<DateTime<Utc>>,
    fetched_at: DateTime<Utc>,
    is_read: i32,
    is_favorite: i32,
    is_hidden: i32,
    is_read_later: i32,
    translated_title: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            feed_id: Uuid::parse_str(&row.feed_id).unwrap_or_default(),
            url: row.url,
            url_key: row.url_key,
            guid: row.guid,
            title: row.title,
            author: row.author,
            content_text: row.content_text,
            published_at: row.published_at,
            fetched_at: row.fetched_at,
            is_read: row.is_read != 0,
            is_favorite: row.is_favorite != 0,
            is_hidden: row.is_hidden != 0,
            is_read_later: row.is_read_later != 0,
            translated_title: row.translated_title,
            summary: row.summary,
            created_at: row.created_at,
        }
    }
}

const SELECT_ARTICLE: &str = r#"
    SELECT id, feed_id, url, url_key, guid, title, author, content_text,
           published_at, fetched_at, is_read, is_favorite, is_hidden, is_read_later,
           translated_title, summary, created_at
    FROM articles
"#;

impl<'a> ArticleRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Whether the feed already holds an article for this link.
    ///
    /// Matches the exact link first, then the canonical key.
    pub async fn exists(&self, feed_id: Uuid, url: &str, url_key: &str) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM articles
            WHERE feed_id = ? AND (url = ? OR url_key = ?)
            LIMIT 1
            "#,
        )
        .bind(feed_id.to_string())
        .bind(url)
        .bind(url_key)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(found.is_some())
    }

    /// Insert a new article. Returns `None` when (feed, canonical key) is already stored.
    pub async fn create(&self, new_article: &NewArticle) -> Result<Option<Article>> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
            (id, feed_id, url, url_key, guid, title, author, content_text, published_at, fetched_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(new_article.feed_id.to_string())
        .bind(&new_article.url)
        .bind(&new_article.url_key)
        .bind(&new_article.guid)
        .bind(&new_article.title)
        .bind(&new_article.author)
        .bind(&new_article.content_text)
        .bind(new_article.published_at)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            self.find_by_id(id).await
        } else {
            Ok(None)
        }
    }

    /// Find an article by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as(&format!("{SELECT_ARTICLE} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(Article::from))
    }

    /// List articles matching a filter, newest first
    pub async fn list(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_ARTICLE);
        query.push(" WHERE 1 = 1");

        if let Some(feed_id) = filter.feed_id {
            query.push(" AND feed_id = ").push_bind(feed_id.to_string());
        }
        if filter.unread_only {
            query.push(" AND is_read = 0");
        }
        if filter.favorites_only {
            query.push(" AND is_favorite = 1");
        }
        if !filter.include_hidden {
            query.push(" AND is_hidden = 0");
        }

        query.push(" ORDER BY published_at DESC, created_at DESC LIMIT ");
        query.push_bind(filter.limit.unwrap_or(500) as i64);

        let rows: Vec<ArticleRow> = query.build_query_as().fetch_all(self.db.pool()).await?;

        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Count articles stored for a feed
    pub async fn count_for_feed(&self, feed_id: Uuid) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id.to_string())
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }

    /// Set or clear the favorite flag
    pub async fn set_favorite(&self, id: Uuid, favorite: bool) -> Result<()> {
        sqlx::query("UPDATE articles SET is_favorite = ? WHERE id = ?")
            .bind(favorite as i32)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Set or clear the read-later flag
    pub async fn set_read_later(&self, id: Uuid, read_later: bool) -> Result<()> {
        sqlx::query("UPDATE articles SET is_read_later = ? WHERE id = ?")
            .bind(read_later as i32)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Delete articles fetched more than `max_age_days` ago (favorites and read-later are kept)
    /// An age reaching past the earliest representable time deletes nothing.
    pub async fn cleanup_old_articles(&self, max_age_days: u32) -> Result<u32> {
        let Some(cutoff) = Duration::try_days(i64::from(max_age_days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            tracing::warn!("Article age of {} days is out of range, nothing to clean up", max_age_days);
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE fetched_at < ? AND is_favorite = 0 AND is_read_later = 0
            "#,
        )
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() as u32)
    }

    /// Backdate an article's fetch time
    #[cfg(test)]
    pub(crate) async fn set_fetched_at(&self, id: Uuid, fetched_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE articles SET fetched_at = ? WHERE id = ?")
            .bind(fetched_at)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{canonical_url, FeedSource, NewFeed};
    use crate::storage::FeedRepository;

    async fn setup() -> (Database, Uuid) {
        let db = Database::open_in_memory().await.unwrap();
        let feed = FeedRepository::new(&db)
            .create(&NewFeed {
                source: FeedSource::Url("https://example.com/feed.xml".to_string()),
                category: String::new(),
                title: "Example".to_string(),
            })
            .await
            .unwrap();
        (db, feed.id)
    }

    fn article(feed_id: Uuid, url: &str) -> NewArticle {
        NewArticle {
            feed_id,
            url: url.to_string(),
            url_key: canonical_url(url),
            guid: None,
            title: "Post".to_string(),
            author: None,
            content_text: None,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_unique_per_feed_and_canonical_key() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);

        assert!(repo.create(&article(feed_id, "https://example.com/a?utm=1")).await.unwrap().is_some());
        assert!(repo.create(&article(feed_id, "https://example.com/a?utm=2")).await.unwrap().is_none());
        assert_eq!(repo.count_for_feed(feed_id).await.unwrap(), 1);

        assert!(repo.exists(feed_id, "https://example.com/a?utm=1", "https://example.com/a").await.unwrap());
        assert!(repo.exists(feed_id, "https://example.com/a?x", "https://example.com/a").await.unwrap());
        assert!(!repo.exists(feed_id, "https://example.com/b", "https://example.com/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_feed_cascades_to_articles() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        repo.create(&article(feed_id, "https://example.com/a")).await.unwrap();

        assert!(FeedRepository::new(&db).delete(feed_id).await.unwrap());
        assert_eq!(repo.count_for_feed(feed_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_favorites_and_read_later() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);

        let old = repo.create(&article(feed_id, "https://example.com/old")).await.unwrap().unwrap();
        let fav = repo.create(&article(feed_id, "https://example.com/fav")).await.unwrap().unwrap();
        let later = repo.create(&article(feed_id, "https://example.com/later")).await.unwrap().unwrap();
        repo.create(&article(feed_id, "https://example.com/fresh")).await.unwrap();

        let long_ago = Utc::now() - Duration::days(90);
        for id in [old.id, fav.id, later.id] {
            repo.set_fetched_at(id, long_ago).await.unwrap();
        }
        repo.set_favorite(fav.id, true).await.unwrap();
        repo.set_read_later(later.id, true).await.unwrap();

        assert_eq!(repo.cleanup_old_articles(30).await.unwrap(), 1);
        assert!(repo.find_by_id(old.id).await.unwrap().is_none());
        assert_eq!(repo.count_for_feed(feed_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_age_deletes_nothing() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        let old = repo.create(&article(feed_id, "https://example.com/old")).await.unwrap().unwrap();
        repo.set_fetched_at(old.id, Utc::now() - Duration::days(90)).await.unwrap();

        assert_eq!(repo.cleanup_old_articles(200_000_000).await.unwrap(), 0);
        assert_eq!(repo.cleanup_old_articles(u32::MAX).await.unwrap(), 0);
        assert_eq!(repo.count_for_feed(feed_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        let a = repo.create(&article(feed_id, "https://example.com/a")).await.unwrap().unwrap();
        repo.create(&article(feed_id, "https://example.com/b")).await.unwrap();
        repo.set_favorite(a.id, true).await.unwrap();

        let all = repo.list(&ArticleFilter { feed_id: Some(feed_id), ..Default::default() }).await.unwrap();
        assert_eq!(all.len(), 2);

        let favorites = repo
            .list(&ArticleFilter { favorites_only: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, a.id);
    }
}
