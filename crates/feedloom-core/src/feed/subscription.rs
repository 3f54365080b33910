use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;
use uuid::Uuid;

use super::fetcher::FeedFetcher;
use super::models::{Feed, FeedSource, FeedUpdate, NewFeed, MAX_REFRESH_INTERVAL_SECS};
use super::opml::parse_opml;
use crate::storage::{Database, FeedRepository};
use crate::{Error, Result};

/// Counts from an OPML import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub added: u32,
    pub duplicates: u32,
    pub invalid: u32,
}

/// Creates, edits and removes subscriptions.
///
/// Every new subscription gets an immediate background fetch; those tasks
/// are tracked so callers can wait for them before exiting.
#[derive(Clone)]
pub struct SubscriptionManager {
    db: Database,
    fetcher: FeedFetcher,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    pub fn new(db: Database, fetcher: FeedFetcher, shutdown: CancellationToken) -> Self {
        Self {
            db,
            fetcher,
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Subscribe to a network feed
    pub async fn add_subscription(&self, location: &str, category: &str, title: &str) -> Result<Uuid> {
        let url = validate_feed_url(location)?;
        self.create(FeedSource::Url(url), category, title).await
    }

    /// Subscribe to a script under the scripts directory
    pub async fn add_script_subscription(
        &self,
        script_path: &str,
        category: &str,
        title: &str,
    ) -> Result<Uuid> {
        let path = self.script_location(script_path)?;
        self.create(FeedSource::Script(path), category, title).await
    }

    async fn create(&self, source: FeedSource, category: &str, title: &str) -> Result<Uuid> {
        let repo = FeedRepository::new(&self.db);
        if repo.find_by_location(source.location()).await?.is_some() {
            return Err(Error::Validation(format!(
                "Already subscribed to {}",
                source.location()
            )));
        }

        let new_feed = NewFeed {
            source,
            category: category.trim().to_string(),
            title: title.trim().to_string(),
        };

        let feed = repo.create(&new_feed).await.map_err(|e| duplicate_or(e, new_feed.source.location()))?;
        tracing::info!("Created subscription: {} ({})", feed.display_name(), feed.id);

        self.spawn_initial_fetch(feed.clone());
        Ok(feed.id)
    }

    fn spawn_initial_fetch(&self, feed: Feed) {
        let fetcher = self.fetcher.clone();
        let cancel = self.shutdown.child_token();

        self.tracker.spawn(async move {
            match fetcher.fetch_single_feed(&feed, &cancel).await {
                Ok(count) => tracing::debug!("Initial fetch of {} stored {} articles", feed.id, count),
                Err(e) if e.is_cancelled() => {}
                // Already recorded on the feed
                Err(e) => tracing::debug!("Initial fetch of {} failed: {}", feed.id, e),
            }
        });
    }

    /// Apply a partial configuration change
    pub async fn update_subscription(&self, id: Uuid, mut update: FeedUpdate) -> Result<Feed> {
        let repo = FeedRepository::new(&self.db);
        let feed = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))?;

        if let Some(location) = update.location.take() {
            let location = match feed.source {
                FeedSource::Url(_) => validate_feed_url(&location)?,
                FeedSource::Script(_) => self.script_location(&location)?,
            };
            if location != feed.source.location() {
                if repo.find_by_location(&location).await?.is_some() {
                    return Err(Error::Validation(format!("Already subscribed to {}", location)));
                }
                update.location = Some(location);
            }
        }

        if let Some(Some(secs)) = update.refresh_interval_secs {
            if secs > MAX_REFRESH_INTERVAL_SECS {
                return Err(Error::Validation(format!(
                    "Refresh interval must be at most {} seconds",
                    MAX_REFRESH_INTERVAL_SECS
                )));
            }
        }

        if let Some(Some(proxy)) = &update.proxy_url {
            let proxy = proxy.trim();
            if proxy.is_empty() {
                update.proxy_url = Some(None);
            } else {
                reqwest::Proxy::all(proxy)
                    .map_err(|e| Error::Validation(format!("Invalid proxy URL: {}", e)))?;
            }
        }

        update.title = update.title.map(|t| t.trim().to_string());
        update.category = update.category.map(|c| c.trim().to_string());

        if !update.is_empty() {
            let location = update.location.clone();
            repo.update(id, &update)
                .await
                .map_err(|e| duplicate_or(e, location.as_deref().unwrap_or_default()))?;
        }

        repo.find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))
    }

    /// Delete a subscription and its articles. Returns false if it did not exist.
    pub async fn remove_subscription(&self, id: Uuid) -> Result<bool> {
        let removed = FeedRepository::new(&self.db).delete(id).await?;
        if removed {
            tracing::info!("Removed subscription {}", id);
        }
        Ok(removed)
    }

    /// Subscribe to every feed in an OPML document
    pub async fn import_opml(&self, content: &str) -> Result<ImportReport> {
        let entries = parse_opml(content)?;
        let repo = FeedRepository::new(&self.db);
        let mut report = ImportReport::default();

        for entry in entries {
            let url = match validate_feed_url(&entry.url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Skipping OPML entry {}: {}", entry.url, e);
                    report.invalid += 1;
                    continue;
                }
            };

            if repo.find_by_location(&url).await?.is_some() {
                report.duplicates += 1;
                continue;
            }

            match self.create(FeedSource::Url(url), &entry.category, &entry.name).await {
                Ok(_) => report.added += 1,
                Err(Error::Validation(_)) => report.duplicates += 1,
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "OPML import: {} added, {} duplicates, {} invalid",
            report.added,
            report.duplicates,
            report.invalid
        );
        Ok(report)
    }

    /// Wait for every initial fetch spawned so far
    pub async fn wait_for_initial_fetches(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Script path as stored: relative to the scripts directory
    fn script_location(&self, script_path: &str) -> Result<String> {
        let policy = self.fetcher.script_policy();
        let resolved = policy.resolve(script_path)?;
        let dir = policy.dir().canonicalize()?;

        Ok(resolved
            .strip_prefix(&dir)
            .unwrap_or(&resolved)
            .to_string_lossy()
            .into_owned())
    }
}

/// Check a user-supplied feed URL; returns it trimmed
pub fn validate_feed_url(location: &str) -> Result<String> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Error::Validation("Feed URL is empty".to_string()));
    }

    let url = Url::parse(location)
        .map_err(|e| Error::Validation(format!("Invalid feed URL '{}': {}", location, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(location.to_string()),
        other => Err(Error::Validation(format!(
            "Unsupported URL scheme '{}' in {}",
            other, location
        ))),
    }
}

fn duplicate_or(err: Error, location: &str) -> Error {
    match &err {
        Error::Database(db_err)
            if db_err
                .as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false) =>
        {
            Error::Validation(format!("Already subscribed to {}", location))
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::settings::Settings;
    use crate::storage::ArticleRepository;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Upstream Title</title>
<item><title>Hello</title><link>https://a.example/hello</link></item>
</channel></rss>"#;

    async fn manager_with(config: AppConfig) -> (Database, SubscriptionManager) {
        let db = Database::open_in_memory().await.unwrap();
        let settings = Settings::new(db.clone(), config.sync.clone());
        let fetcher = FeedFetcher::new(db.clone(), settings, &config).unwrap();
        let manager = SubscriptionManager::new(db.clone(), fetcher, CancellationToken::new());
        (db, manager)
    }

    #[tokio::test]
    async fn test_add_triggers_first_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let (db, manager) = manager_with(AppConfig::default()).await;
        let id = manager
            .add_subscription(&format!("  {}/feed.xml ", server.uri()), " Tech ", "")
            .await
            .unwrap();
        manager.wait_for_initial_fetches().await;

        let feed = FeedRepository::new(&db).find_by_id(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "Upstream Title");
        assert_eq!(feed.category, "Tech");
        assert_eq!(feed.source.location(), format!("{}/feed.xml", server.uri()));
        assert_eq!(ArticleRepository::new(&db).count_for_feed(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_and_duplicate() {
        let (db, manager) = manager_with(AppConfig::default()).await;

        for bad in ["", "   ", "not a url", "ftp://example.com/feed"] {
            let err = manager.add_subscription(bad, "", "").await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad}: {err}");
        }

        // Nothing listens on port 9; the failed first fetch lands on the feed
        manager.add_subscription("http://127.0.0.1:9/feed", "", "Local").await.unwrap();
        let err = manager.add_subscription("http://127.0.0.1:9/feed", "", "").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        manager.wait_for_initial_fetches().await;
        assert_eq!(FeedRepository::new(&db).count().await.unwrap(), 1);
        let feeds = FeedRepository::new(&db).list_all().await.unwrap();
        assert!(feeds[0].has_error());
    }

    #[tokio::test]
    async fn test_script_subscription_is_policy_checked() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hn.sh"), format!("cat <<'EOF'\n{FEED}\nEOF\n")).unwrap();

        let mut config = AppConfig::default();
        config.scripts.dir = Some(dir.path().to_path_buf());
        let (db, manager) = manager_with(config).await;

        assert!(matches!(
            manager.add_script_subscription("../hn.sh", "", "").await,
            Err(Error::Validation(_))
        ));

        let id = manager.add_script_subscription("./hn.sh", "", "").await.unwrap();
        manager.wait_for_initial_fetches().await;

        let feed = FeedRepository::new(&db).find_by_id(id).await.unwrap().unwrap();
        assert_eq!(feed.source, FeedSource::Script("hn.sh".to_string()));
        assert_eq!(feed.title, "Upstream Title");
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (db, manager) = manager_with(AppConfig::default()).await;
        let id = manager.add_subscription("http://127.0.0.1:9/a", "", "A").await.unwrap();
        manager.add_subscription("http://127.0.0.1:9/b", "", "B").await.unwrap();
        manager.wait_for_initial_fetches().await;

        let clash = FeedUpdate {
            location: Some("http://127.0.0.1:9/b".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_subscription(id, clash).await,
            Err(Error::Validation(_))
        ));

        let update = FeedUpdate {
            title: Some(" Renamed ".to_string()),
            refresh_interval_secs: Some(Some(3600)),
            ..Default::default()
        };
        let feed = manager.update_subscription(id, update).await.unwrap();
        assert_eq!(feed.title, "Renamed");
        assert_eq!(feed.refresh_interval_secs, Some(3600));

        let too_long = FeedUpdate {
            refresh_interval_secs: Some(Some(10_000_000_000_000_000)),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_subscription(id, too_long).await,
            Err(Error::Validation(_))
        ));
        let feed = FeedRepository::new(&db).find_by_id(id).await.unwrap().unwrap();
        assert_eq!(feed.refresh_interval_secs, Some(3600));

        assert!(matches!(
            manager.update_subscription(Uuid::new_v4(), FeedUpdate::default()).await,
            Err(Error::FeedNotFound(_))
        ));

        assert!(manager.remove_subscription(id).await.unwrap());
        assert!(!manager.remove_subscription(id).await.unwrap());
        assert_eq!(FeedRepository::new(&db).count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_opml_counts() {
        let (db, manager) = manager_with(AppConfig::default()).await;
        manager.add_subscription("http://127.0.0.1:9/existing", "", "").await.unwrap();

        let opml = r#"<opml version="2.0"><body>
<outline text="News">
  <outline text="One" xmlUrl="http://127.0.0.1:9/one"/>
  <outline text="Existing" xmlUrl="http://127.0.0.1:9/existing"/>
  <outline text="Broken" xmlUrl="javascript:alert(1)"/>
</outline>
</body></opml>"#;

        let report = manager.import_opml(opml).await.unwrap();
        manager.wait_for_initial_fetches().await;

        assert_eq!(report.added, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.invalid, 1);

        let one = FeedRepository::new(&db)
            .find_by_location("http://127.0.0.1:9/one")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one.category, "News");
        assert_eq!(one.title, "One");
    }
}
