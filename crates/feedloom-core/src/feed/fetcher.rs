use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::canonical::canonical_url;
use super::models::{Feed, FeedSource, NewArticle};
use super::parser::{parse_feed as parse_document, ParsedFeed, ParsedItem};
use super::source::{build_client, ContentSource, HttpSource, ScriptPolicy};
use crate::config::AppConfig;
use crate::settings::{Settings, MAX_REFRESH_CONCURRENCY};
use crate::storage::{ArticleRepository, Database, FeedRepository};
use crate::{Error, Result};

/// Outcome of one feed within a full refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFetchResult {
    pub feed_id: Uuid,
    pub title: String,
    pub new_articles: u32,
    pub error: Option<String>,
}

/// Summary of a `fetch_all` pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshReport {
    pub results: Vec<FeedFetchResult>,
    /// Feeds skipped because the pass was cancelled
    pub cancelled: u32,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }

    pub fn new_articles(&self) -> u32 {
        self.results.iter().map(|r| r.new_articles).sum()
    }
}

/// Retrieves, parses and stores feeds
#[derive(Clone)]
pub struct FeedFetcher {
    db: Database,
    settings: Settings,
    client: Client,
    request_timeout: Duration,
    scripts: ScriptPolicy,
}

impl FeedFetcher {
    pub fn new(db: Database, settings: Settings, config: &AppConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.sync.request_timeout_secs);
        let client = build_client(request_timeout, config.sync.proxy_url.as_deref())?;
        if config.sync.proxy_url.is_some() {
            tracing::info!("Using HTTP proxy for feed fetching");
        }

        Ok(Self {
            db,
            settings,
            client,
            request_timeout,
            scripts: ScriptPolicy::new(
                config.scripts_dir(),
                Duration::from_secs(config.scripts.timeout_secs),
            ),
        })
    }

    pub fn script_policy(&self) -> &ScriptPolicy {
        &self.scripts
    }

    fn content_source(&self, source: &FeedSource, proxy: Option<&str>) -> Result<Box<dyn ContentSource>> {
        match source {
            FeedSource::Url(url) => {
                // A per-feed proxy needs its own client; everything else shares one
                let client = match proxy {
                    Some(proxy) => build_client(self.request_timeout, Some(proxy))?,
                    None => self.client.clone(),
                };
                Ok(Box::new(HttpSource::new(client, url.clone())))
            }
            FeedSource::Script(path) => Ok(Box::new(self.scripts.source(path)?)),
        }
    }

    /// Retrieve and parse a feed without touching the store
    pub async fn parse_feed(
        &self,
        source: &FeedSource,
        proxy: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ParsedFeed> {
        let content_source = self.content_source(source, proxy)?;

        let content = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = content_source.retrieve() => result?,
        };

        parse_document(&content)
    }

    /// Fetch one feed and store its new articles. Returns the number stored.
    ///
    /// Retrieval and parse failures are recorded on the feed and returned.
    /// A cancelled attempt records nothing.
    pub async fn fetch_single_feed(&self, feed: &Feed, cancel: &CancellationToken) -> Result<u32> {
        let attempt_at = Utc::now();
        let feeds = FeedRepository::new(&self.db);

        let parsed = match self.parse_feed(&feed.source, feed.proxy_url.as_deref(), cancel).await {
            Ok(parsed) => parsed,
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Fetch of {} cancelled", feed.display_name());
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Failed to fetch feed {}: {}", feed.display_name(), e);
                match feeds.record_failure(feed.id, attempt_at, &e.to_string()).await {
                    Ok(false) => tracing::debug!("Newer attempt already recorded for {}", feed.id),
                    Ok(true) => {}
                    Err(store_err) => {
                        tracing::warn!("Failed to record error for feed {}: {}", feed.id, store_err)
                    }
                }
                return Err(e);
            }
        };

        let new_count = self.store_items(feed.id, &parsed.items).await;

        match feeds
            .record_success(
                feed.id,
                attempt_at,
                parsed.title.as_deref(),
                parsed.description.as_deref(),
                parsed.site_url.as_deref(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Newer attempt already recorded for {}", feed.id),
            Err(e) => tracing::warn!("Failed to update feed {}: {}", feed.id, e),
        }

        tracing::info!(
            "Fetched {}: {} items, {} new",
            feed.display_name(),
            parsed.items.len(),
            new_count
        );

        Ok(new_count)
    }

    /// Manual refresh of one feed
    pub async fn fetch_feed_by_id(&self, id: Uuid, cancel: &CancellationToken) -> Result<u32> {
        let feed = FeedRepository::new(&self.db)
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))?;

        self.fetch_single_feed(&feed, cancel).await
    }

    /// Fetch every due feed with bounded concurrency.
    ///
    /// Per-feed failures end up in the report; only failing to load the feed
    /// list is an error.
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        let now = Utc::now();
        let feeds: Vec<Feed> = FeedRepository::new(&self.db)
            .list_all()
            .await?
            .into_iter()
            .filter(|feed| feed.is_due(now))
            .collect();

        let concurrency = match self.settings.max_concurrent_refreshes().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Failed to read refresh concurrency, using default: {}", e);
                self.settings.defaults().max_concurrent_refreshes.clamp(1, MAX_REFRESH_CONCURRENCY)
            }
        };

        tracing::info!("Refreshing {} feeds ({} at a time)", feeds.len(), concurrency);

        let outcomes: Vec<(Feed, Result<u32>)> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetch_single_feed(&feed, cancel).await;
                (feed, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = RefreshReport::default();
        for (feed, result) in outcomes {
            match result {
                Err(e) if e.is_cancelled() => report.cancelled += 1,
                result => report.results.push(FeedFetchResult {
                    feed_id: feed.id,
                    title: feed.display_name().to_string(),
                    new_articles: *result.as_ref().unwrap_or(&0),
                    error: result.err().map(|e| e.to_string()),
                }),
            }
        }

        tracing::info!(
            "Refresh finished: {} ok, {} failed, {} new articles",
            report.succeeded(),
            report.failed(),
            report.new_articles()
        );

        Ok(report)
    }

    /// Store items not yet seen on this feed. Per-article failures are logged and skipped.
    async fn store_items(&self, feed_id: Uuid, items: &[ParsedItem]) -> u32 {
        let articles = ArticleRepository::new(&self.db);
        let mut created = 0;

        for item in items {
            let url_key = canonical_url(&item.link);

            match articles.exists(feed_id, &item.link, &url_key).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to check article {}: {}", item.link, e);
                    continue;
                }
            }

            let new_article = NewArticle {
                feed_id,
                url: item.link.clone(),
                url_key,
                guid: Some(item.guid.clone()),
                title: item.title.clone(),
                author: item.author.clone(),
                content_text: item.content_text.clone(),
                published_at: item.published_at,
            };

            match articles.create(&new_article).await {
                Ok(Some(_)) => created += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to store article {}: {}", item.link, e),
            }
        }

        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::NewFeed;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link)| {
                format!("<item><title>{title}</title><link>{link}</link><guid>{link}</guid></item>")
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Mock Feed</title><link>https://mock.example/</link>{items}</channel></rss>"#
        )
    }

    async fn setup() -> (Database, FeedFetcher) {
        let db = Database::open_in_memory().await.unwrap();
        let config = AppConfig::default();
        let settings = Settings::new(db.clone(), config.sync.clone());
        let fetcher = FeedFetcher::new(db.clone(), settings, &config).unwrap();
        (db, fetcher)
    }

    async fn add_feed(db: &Database, url: String) -> Feed {
        FeedRepository::new(db)
            .create(&NewFeed {
                source: FeedSource::Url(url),
                category: String::new(),
                title: String::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_one_failing_feed_does_not_affect_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("One", "https://a.example/1")])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (db, fetcher) = setup().await;
        let a = add_feed(&db, format!("{}/a.xml", server.uri())).await;
        let b = add_feed(&db, format!("{}/b.xml", server.uri())).await;

        let report = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.new_articles(), 1);

        let repo = FeedRepository::new(&db);
        let a = repo.find_by_id(a.id).await.unwrap().unwrap();
        let b = repo.find_by_id(b.id).await.unwrap().unwrap();

        assert!(a.last_fetched_at.is_some());
        assert!(a.last_error.is_none());
        assert_eq!(a.title, "Mock Feed");

        assert!(b.last_fetched_at.is_none());
        assert!(b.last_error.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_query_string_variants_store_one_article() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[("Post", "https://a.example/post?utm=1")])),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[("Post", "https://a.example/post?utm=2")])),
            )
            .mount(&server)
            .await;

        let (db, fetcher) = setup().await;
        let feed = add_feed(&db, format!("{}/feed.xml", server.uri())).await;
        let cancel = CancellationToken::new();

        assert_eq!(fetcher.fetch_single_feed(&feed, &cancel).await.unwrap(), 1);
        assert_eq!(fetcher.fetch_single_feed(&feed, &cancel).await.unwrap(), 0);
        assert_eq!(ArticleRepository::new(&db).count_for_feed(feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_error_is_cleared_by_next_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
            .mount(&server)
            .await;

        let (db, fetcher) = setup().await;
        let feed = add_feed(&db, server.uri()).await;
        let cancel = CancellationToken::new();

        assert!(fetcher.fetch_feed_by_id(feed.id, &cancel).await.is_err());
        assert!(FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap().has_error());

        fetcher.fetch_feed_by_id(feed.id, &cancel).await.unwrap();
        assert!(!FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap().has_error());
    }

    #[tokio::test]
    async fn test_cancellation_records_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[]))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let (db, fetcher) = setup().await;
        let feed = add_feed(&db, server.uri()).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = fetcher.fetch_single_feed(&feed, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        let stored = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(stored.last_error.is_none());
        assert!(stored.last_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_remaining_feeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let (db, fetcher) = setup().await;
        Settings::new(db.clone(), AppConfig::default().sync)
            .set(crate::settings::keys::MAX_CONCURRENT_REFRESHES, "1")
            .await
            .unwrap();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(add_feed(&db, format!("{}/{i}.xml", server.uri())).await.id);
        }

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = fetcher.fetch_all(&cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());
        assert!(report.cancelled > 0);
        assert_eq!(report.results.len() + report.cancelled as usize, ids.len());

        let repo = FeedRepository::new(&db);
        for id in ids {
            if report.results.iter().any(|r| r.feed_id == id) {
                continue;
            }
            let stored = repo.find_by_id(id).await.unwrap().unwrap();
            assert!(stored.last_error.is_none());
            assert!(stored.last_attempt_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_huge_interval_override_is_skipped() {
        let (db, fetcher) = setup().await;
        let feed = add_feed(&db, "http://127.0.0.1:9/feed.xml".to_string()).await;
        let repo = FeedRepository::new(&db);
        repo.update(
            feed.id,
            &crate::feed::FeedUpdate {
                refresh_interval_secs: Some(Some(10_000_000_000_000_000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        repo.record_success(feed.id, Utc::now(), None, None, None).await.unwrap();

        let report = fetcher.fetch_all(&CancellationToken::new()).await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.cancelled, 0);
    }

    #[tokio::test]
    async fn test_unknown_feed_id() {
        let (_db, fetcher) = setup().await;
        let err = fetcher
            .fetch_feed_by_id(Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeedNotFound(_)));
    }
}
