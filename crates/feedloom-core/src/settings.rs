//! Live-tunable settings backed by the `settings` table.
//!
//! Values stored in the database win over the `[sync]` config section, which
//! only supplies defaults. Every accessor reads the store on call so changes
//! made while the daemon runs are picked up by the next consumer.

use std::time::Duration;

use crate::config::SyncConfig;
use crate::storage::{Database, SettingsRepository};
use crate::{Error, Result};

pub mod keys {
    pub const REFRESH_INTERVAL_SECS: &str = "refresh_interval_secs";
    pub const MAX_CONCURRENT_REFRESHES: &str = "max_concurrent_refreshes";
    pub const AUTO_CLEANUP_ENABLED: &str = "auto_cleanup_enabled";
    pub const MAX_ARTICLE_AGE_DAYS: &str = "max_article_age_days";

    pub const ALL: [&str; 4] = [
        REFRESH_INTERVAL_SECS,
        MAX_CONCURRENT_REFRESHES,
        AUTO_CLEANUP_ENABLED,
        MAX_ARTICLE_AGE_DAYS,
    ];
}

/// Upper bound on concurrent feed fetches per full refresh
pub const MAX_REFRESH_CONCURRENCY: usize = 32;

/// Upper bound on the article retention age (a century)
pub const MAX_ARTICLE_AGE_DAYS: u32 = 36_500;

#[derive(Clone)]
pub struct Settings {
    db: Database,
    defaults: SyncConfig,
}

impl Settings {
    pub fn new(db: Database, defaults: SyncConfig) -> Self {
        Self { db, defaults }
    }

    pub fn defaults(&self) -> &SyncConfig {
        &self.defaults
    }

    /// Effective value of a known key (stored, else default)
    pub async fn get(&self, key: &str) -> Result<String> {
        let default = self.default_for(key)?;
        let stored = SettingsRepository::new(&self.db).get(key).await?;
        Ok(stored.unwrap_or(default))
    }

    /// Validate and store a value for a known key
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let normalized = match key {
            keys::REFRESH_INTERVAL_SECS => parse_u64(key, value)?.to_string(),
            keys::MAX_CONCURRENT_REFRESHES => {
                let n = parse_u64(key, value)?;
                if n == 0 || n as usize > MAX_REFRESH_CONCURRENCY {
                    return Err(Error::Validation(format!(
                        "{key} must be between 1 and {MAX_REFRESH_CONCURRENCY}"
                    )));
                }
                n.to_string()
            }
            keys::AUTO_CLEANUP_ENABLED => parse_bool(key, value)?.to_string(),
            keys::MAX_ARTICLE_AGE_DAYS => {
                let days = parse_u64(key, value)?;
                if days > u64::from(MAX_ARTICLE_AGE_DAYS) {
                    return Err(Error::Validation(format!(
                        "{key} must be at most {MAX_ARTICLE_AGE_DAYS}"
                    )));
                }
                days.to_string()
            }
            other => return Err(Error::Validation(format!("Unknown setting: {other}"))),
        };

        SettingsRepository::new(&self.db).set(key, &normalized).await?;
        tracing::info!(key, value = %normalized, "Setting updated");
        Ok(())
    }

    /// Effective values of every known key
    pub async fn list(&self) -> Result<Vec<(String, String)>> {
        let mut values = Vec::with_capacity(keys::ALL.len());
        for key in keys::ALL {
            values.push((key.to_string(), self.get(key).await?));
        }
        Ok(values)
    }

    /// Scheduler cadence; zero disables automatic refresh
    pub async fn refresh_interval(&self) -> Result<Duration> {
        let secs = self
            .typed(keys::REFRESH_INTERVAL_SECS, |v| v.parse::<u64>().ok())
            .await?
            .unwrap_or(self.defaults.refresh_interval_secs);
        Ok(Duration::from_secs(secs))
    }

    /// Worker count for a full refresh, clamped to `1..=MAX_REFRESH_CONCURRENCY`
    pub async fn max_concurrent_refreshes(&self) -> Result<usize> {
        let n = self
            .typed(keys::MAX_CONCURRENT_REFRESHES, |v| v.parse::<usize>().ok())
            .await?
            .unwrap_or(self.defaults.max_concurrent_refreshes);
        Ok(n.clamp(1, MAX_REFRESH_CONCURRENCY))
    }

    pub async fn auto_cleanup_enabled(&self) -> Result<bool> {
        Ok(self
            .typed(keys::AUTO_CLEANUP_ENABLED, |v| parse_bool("", v).ok())
            .await?
            .unwrap_or(self.defaults.auto_cleanup_enabled))
    }

    /// Retention age for cleanup, capped at `MAX_ARTICLE_AGE_DAYS`
    pub async fn max_article_age_days(&self) -> Result<u32> {
        let days = self
            .typed(keys::MAX_ARTICLE_AGE_DAYS, |v| v.parse::<u32>().ok())
            .await?
            .unwrap_or(self.defaults.max_article_age_days);
        Ok(days.min(MAX_ARTICLE_AGE_DAYS))
    }

    async fn typed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
        let stored = SettingsRepository::new(&self.db).get(key).await?;
        Ok(stored.and_then(|v| {
            let parsed = parse(&v);
            if parsed.is_none() {
                tracing::warn!(key, value = %v, "Ignoring malformed stored setting");
            }
            parsed
        }))
    }

    fn default_for(&self, key: &str) -> Result<String> {
        let d = &self.defaults;
        Ok(match key {
            keys::REFRESH_INTERVAL_SECS => d.refresh_interval_secs.to_string(),
            keys::MAX_CONCURRENT_REFRESHES => d.max_concurrent_refreshes.to_string(),
            keys::AUTO_CLEANUP_ENABLED => d.auto_cleanup_enabled.to_string(),
            keys::MAX_ARTICLE_AGE_DAYS => d.max_article_age_days.to_string(),
            other => return Err(Error::Validation(format!("Unknown setting: {other}"))),
        })
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::Validation(format!("{key} expects a non-negative integer, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Validation(format!("{key} expects true or false, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settings() -> Settings {
        let db = Database::open_in_memory().await.unwrap();
        Settings::new(db, SyncConfig::default())
    }

    #[tokio::test]
    async fn test_defaults_until_stored() {
        let settings = settings().await;
        assert_eq!(settings.refresh_interval().await.unwrap(), Duration::from_secs(1800));
        assert_eq!(settings.get(keys::MAX_CONCURRENT_REFRESHES).await.unwrap(), "5");

        settings.set(keys::REFRESH_INTERVAL_SECS, "600").await.unwrap();
        assert_eq!(settings.refresh_interval().await.unwrap(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_set_validates() {
        let settings = settings().await;
        assert!(matches!(
            settings.set(keys::MAX_CONCURRENT_REFRESHES, "0").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            settings.set(keys::AUTO_CLEANUP_ENABLED, "maybe").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(settings.set("theme", "dark").await, Err(Error::Validation(_))));
        assert!(matches!(
            settings.set(keys::MAX_ARTICLE_AGE_DAYS, "200000000").await,
            Err(Error::Validation(_))
        ));
        settings.set(keys::MAX_ARTICLE_AGE_DAYS, "36500").await.unwrap();

        settings.set(keys::AUTO_CLEANUP_ENABLED, "off").await.unwrap();
        assert!(!settings.auto_cleanup_enabled().await.unwrap());
        assert_eq!(settings.get(keys::AUTO_CLEANUP_ENABLED).await.unwrap(), "false");
    }

    #[tokio::test]
    async fn test_concurrency_is_clamped() {
        let db = Database::open_in_memory().await.unwrap();
        let defaults = SyncConfig {
            max_concurrent_refreshes: 500,
            ..Default::default()
        };
        let settings = Settings::new(db, defaults);
        assert_eq!(settings.max_concurrent_refreshes().await.unwrap(), MAX_REFRESH_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_stored_age_out_of_range_is_capped() {
        let db = Database::open_in_memory().await.unwrap();
        SettingsRepository::new(&db)
            .set(keys::MAX_ARTICLE_AGE_DAYS, "4000000000")
            .await
            .unwrap();
        let settings = Settings::new(db, SyncConfig::default());
        assert_eq!(settings.max_article_age_days().await.unwrap(), MAX_ARTICLE_AGE_DAYS);
    }

    #[tokio::test]
    async fn test_list_covers_all_keys() {
        let settings = settings().await;
        let values = settings.list().await.unwrap();
        assert_eq!(values.len(), keys::ALL.len());
    }
}
