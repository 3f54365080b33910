use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::service::ScheduledJobs;
use crate::feed::{FeedFetcher, RefreshReport};
use crate::settings::Settings;
use crate::storage::{ArticleRepository, Database};
use crate::Result;

/// Delete articles older than `max_age_days` (favorites and read-later survive)
pub async fn cleanup_old_articles(db: &Database, max_age_days: u32) -> Result<u32> {
    let deleted = ArticleRepository::new(db).cleanup_old_articles(max_age_days).await?;

    if deleted > 0 {
        tracing::info!("Cleaned up {} old articles", deleted);
    }

    Ok(deleted)
}

/// The production job set: full refresh plus settings-gated cleanup
pub struct FeedRefreshJobs {
    db: Database,
    fetcher: FeedFetcher,
    settings: Settings,
}

impl FeedRefreshJobs {
    pub fn new(db: Database, fetcher: FeedFetcher, settings: Settings) -> Self {
        Self { db, fetcher, settings }
    }
}

#[async_trait]
impl ScheduledJobs for FeedRefreshJobs {
    async fn refresh_interval(&self) -> Result<Duration> {
        self.settings.refresh_interval().await
    }

    async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        self.fetcher.fetch_all(cancel).await
    }

    async fn cleanup(&self) -> Result<Option<u32>> {
        // Evaluated per run so toggling the setting needs no restart
        if !self.settings.auto_cleanup_enabled().await? {
            return Ok(None);
        }

        let max_age_days = self.settings.max_article_age_days().await?;
        cleanup_old_articles(&self.db, max_age_days).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::settings::keys;

    #[tokio::test]
    async fn test_cleanup_respects_setting() {
        let db = Database::open_in_memory().await.unwrap();
        let config = AppConfig::default();
        let settings = Settings::new(db.clone(), config.sync.clone());
        let fetcher = FeedFetcher::new(db.clone(), settings.clone(), &config).unwrap();
        let jobs = FeedRefreshJobs::new(db, fetcher, settings.clone());

        assert_eq!(jobs.cleanup().await.unwrap(), Some(0));

        settings.set(keys::AUTO_CLEANUP_ENABLED, "false").await.unwrap();
        assert_eq!(jobs.cleanup().await.unwrap(), None);

        settings.set(keys::REFRESH_INTERVAL_SECS, "0").await.unwrap();
        assert_eq!(jobs.refresh_interval().await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_refresh_with_no_feeds() {
        let db = Database::open_in_memory().await.unwrap();
        let config = AppConfig::default();
        let settings = Settings::new(db.clone(), config.sync.clone());
        let fetcher = FeedFetcher::new(db.clone(), settings.clone(), &config).unwrap();
        let jobs = FeedRefreshJobs::new(db, fetcher, settings);

        let report = jobs.refresh(&CancellationToken::new()).await.unwrap();
        assert!(report.results.is_empty());
    }
}
