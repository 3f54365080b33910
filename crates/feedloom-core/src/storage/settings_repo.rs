use chrono::Utc;

use super::Database;
use crate::Result;

/// Repository for the string key/value `settings` table
pub struct SettingsRepository<'a> {
    db: &'a Database,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get the stored value for a key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|r| r.0))
    }

    /// Insert or replace a value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// All stored values, ordered by key
    pub async fn list(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings ORDER BY key ASC")
                .fetch_all(self.db.pool())
                .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SettingsRepository::new(&db);

        assert!(repo.get("refresh_interval_secs").await.unwrap().is_none());
        repo.set("refresh_interval_secs", "600").await.unwrap();
        repo.set("refresh_interval_secs", "900").await.unwrap();

        assert_eq!(repo.get("refresh_interval_secs").await.unwrap().as_deref(), Some("900"));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
