use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::discovery::{BlogDiscoverer, DiscoveryCoordinator, SiteCrawler};
use crate::feed::{Article, ArticleFilter, Feed, FeedFetcher, RefreshReport, SubscriptionManager};
use crate::scheduler::{cleanup_old_articles, FeedRefreshJobs, SchedulerEvent, SchedulerHandle, SchedulerService};
use crate::settings::Settings;
use crate::storage::{ArticleRepository, Database, FeedRepository};
use crate::Result;

/// Everything the daemon and the CLI operate on, wired once.
///
/// All background work (initial fetches, discovery runs, the scheduler)
/// hangs off one shutdown token owned here.
#[derive(Clone)]
pub struct Engine {
    db: Database,
    config: Arc<AppConfig>,
    settings: Settings,
    fetcher: FeedFetcher,
    subscriptions: SubscriptionManager,
    discovery: DiscoveryCoordinator,
    shutdown: CancellationToken,
}

impl Engine {
    /// Open the on-disk database named by the config
    pub async fn open(config: AppConfig) -> Result<Self> {
        let db = Database::new(&config).await?;
        let crawler = BlogDiscoverer::new(&config.discovery, config.sync.proxy_url.as_deref())?;
        Self::with_parts(db, config, Arc::new(crawler))
    }

    /// Build an engine over an existing database and crawler
    pub fn with_parts(db: Database, config: AppConfig, crawler: Arc<dyn SiteCrawler>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let settings = Settings::new(db.clone(), config.sync.clone());
        let fetcher = FeedFetcher::new(db.clone(), settings.clone(), &config)?;
        let subscriptions = SubscriptionManager::new(db.clone(), fetcher.clone(), shutdown.clone());
        let discovery = DiscoveryCoordinator::new(db.clone(), crawler, &config.discovery, shutdown.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            settings,
            fetcher,
            subscriptions,
            discovery,
            shutdown,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn discovery(&self) -> &DiscoveryCoordinator {
        &self.discovery
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        FeedRepository::new(&self.db).list_all().await
    }

    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        ArticleRepository::new(&self.db).list(filter).await
    }

    /// Fetch one feed now, regardless of its interval
    pub async fn refresh_feed(&self, id: Uuid) -> Result<u32> {
        self.fetcher.fetch_feed_by_id(id, &self.shutdown.child_token()).await
    }

    /// Fetch every due feed now
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        self.fetcher.fetch_all(&self.shutdown.child_token()).await
    }

    /// Remove old articles using the configured age, ignoring the auto-cleanup toggle
    pub async fn cleanup(&self) -> Result<u32> {
        let max_age_days = self.settings.max_article_age_days().await?;
        cleanup_old_articles(&self.db, max_age_days).await
    }

    /// Start the periodic refresh loop under this engine's shutdown token
    pub fn start_scheduler(&self, events: Option<mpsc::UnboundedSender<SchedulerEvent>>) -> SchedulerHandle {
        let jobs = FeedRefreshJobs::new(self.db.clone(), self.fetcher.clone(), self.settings.clone());
        let mut service = SchedulerService::new(Arc::new(jobs));
        if let Some(tx) = events {
            service = service.with_event_sender(tx);
        }
        service.start(&self.shutdown)
    }

    /// Cancel all background work and wait for pending first fetches to wind down
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.subscriptions.wait_for_initial_fetches().await;
        tracing::info!("Engine shut down");
    }
}
