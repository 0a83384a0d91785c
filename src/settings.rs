use anyhow::Result;
use sqlx::SqlitePool;

/// Key-value configuration collaborator backed by the `settings` table.
///
/// Getters follow the collaborator contract: they take a default and never
/// fail — a missing key or an unreadable value falls back to the default
/// (with a warn for unreadable values).
#[derive(Debug, Clone)]
pub struct Settings {
    pool: SqlitePool,
}

/// Defaults seeded on startup; existing values are never overwritten.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("scheduler.workers", "5"),
    ("scanner.priority", "tmdb,anilist"),
    ("scanner.min_success", "1"),
    ("scanner.retry_errors", "false"),
    ("scanner.retry_limit", "3"),
    ("normalize.transliterate", "false"),
    ("intake.skip_folders", "watched,subtitle,sample,extras,trailers"),
];

impl Settings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn seed_defaults(&self) -> Result<()> {
        for (key, value) in DEFAULTS {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn raw(&self, key: &str) -> Option<String> {
        match sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read setting '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key).await.unwrap_or_else(|| default.to_string())
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key).await {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                other => {
                    tracing::warn!("Setting '{}' has non-boolean value '{}'", key, other);
                    default
                }
            },
            None => default,
        }
    }

    pub async fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.raw(key).await {
            Some(value) => match value.trim().parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!("Setting '{}' has non-numeric value '{}'", key, value);
                    default
                }
            },
            None => default,
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO settings (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Comma-separated list value, trimmed, empty entries dropped.
    pub async fn get_list(&self, key: &str, default: &str) -> Vec<String> {
        self.get_string(key, default)
            .await
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::test_pool;

    #[tokio::test]
    async fn test_defaults_and_overrides() {
        let pool = test_pool().await;
        let settings = Settings::new(pool);
        settings.seed_defaults().await.expect("seed");

        assert_eq!(settings.get_int("scheduler.workers", 99).await, 5);
        assert!(!settings.get_bool("scanner.retry_errors", true).await);

        settings.set("scheduler.workers", "8").await.expect("set");
        assert_eq!(settings.get_int("scheduler.workers", 99).await, 8);

        // Seeding again must not clobber the override.
        settings.seed_defaults().await.expect("reseed");
        assert_eq!(settings.get_int("scheduler.workers", 99).await, 8);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_values_fall_back() {
        let pool = test_pool().await;
        let settings = Settings::new(pool);

        assert_eq!(settings.get_string("no.such.key", "fallback").await, "fallback");
        assert_eq!(settings.get_int("no.such.key", 7).await, 7);

        settings.set("bad.number", "abc").await.expect("set");
        assert_eq!(settings.get_int("bad.number", 3).await, 3);

        settings.set("list.key", "a, b,,c").await.expect("set");
        assert_eq!(settings.get_list("list.key", "").await, vec!["a", "b", "c"]);
    }
}
