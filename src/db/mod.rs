use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::FileStatus;

/// Bulk status updates are chunked to bound statement size.
pub const STATUS_BATCH_SIZE: usize = 500;

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS staged_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            directory TEXT NOT NULL,
            file_name TEXT NOT NULL,
            extension TEXT,
            file_kind TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            container_info TEXT,
            nfo_text TEXT,
            status TEXT NOT NULL DEFAULT 'NEW',
            part INTEGER,
            media_file_id INTEGER REFERENCES media_files(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(directory, file_name)
        );

        CREATE TABLE IF NOT EXISTS media_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            container TEXT,
            resolution TEXT,
            source_tag TEXT,
            video_codec TEXT,
            duration_secs INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            year INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS seasons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            series_id INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
            season_number INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(series_id, season_number)
        );

        CREATE TABLE IF NOT EXISTS catalog_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            original_title TEXT,
            plot TEXT,
            year INTEGER,
            premiere_date TEXT,
            rating REAL,
            runtime_minutes INTEGER,
            genres TEXT,
            studio TEXT,
            season_number INTEGER,
            episode_number INTEGER,
            season_id INTEGER REFERENCES seasons(id) ON DELETE SET NULL,
            status TEXT NOT NULL DEFAULT 'NEW',
            scan_attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- MediaFile <-> CatalogRecord is many-to-many: a double-bill file
        -- carries two records, an episode record can span re-released files.
        CREATE TABLE IF NOT EXISTS media_file_records (
            media_file_id INTEGER NOT NULL REFERENCES media_files(id) ON DELETE CASCADE,
            record_id INTEGER NOT NULL REFERENCES catalog_records(id) ON DELETE CASCADE,
            PRIMARY KEY (media_file_id, record_id)
        );

        -- Per-source external-id map for records and series.
        CREATE TABLE IF NOT EXISTS record_external_ids (
            record_id INTEGER NOT NULL REFERENCES catalog_records(id) ON DELETE CASCADE,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            PRIMARY KEY (record_id, source)
        );

        CREATE TABLE IF NOT EXISTS series_external_ids (
            series_id INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            PRIMARY KEY (series_id, source)
        );

        -- Override map: which source last wrote each field of a record.
        CREATE TABLE IF NOT EXISTS record_field_sources (
            record_id INTEGER NOT NULL REFERENCES catalog_records(id) ON DELETE CASCADE,
            field TEXT NOT NULL,
            source TEXT NOT NULL,
            written_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (record_id, field)
        );
        "#,
    )
    .execute(pool)
    .await?;

    create_indexes(pool).await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        // Poll query: oldest claimable video file.
        "CREATE INDEX IF NOT EXISTS idx_staged_files_poll ON staged_files(file_kind, status, created_at)",
        // Deletion sweep and listings.
        "CREATE INDEX IF NOT EXISTS idx_staged_files_status ON staged_files(status)",
        "CREATE INDEX IF NOT EXISTS idx_staged_files_media_file ON staged_files(media_file_id)",
        // Record poll and listings.
        "CREATE INDEX IF NOT EXISTS idx_catalog_records_status ON catalog_records(status)",
        "CREATE INDEX IF NOT EXISTS idx_catalog_records_kind ON catalog_records(kind, status)",
        "CREATE INDEX IF NOT EXISTS idx_catalog_records_season ON catalog_records(season_id)",
        "CREATE INDEX IF NOT EXISTS idx_seasons_series ON seasons(series_id)",
        "CREATE INDEX IF NOT EXISTS idx_media_file_records_record ON media_file_records(record_id)",
    ];

    for index_sql in indexes {
        if let Err(e) = sqlx::query(index_sql).execute(pool).await {
            tracing::warn!("Failed to create index: {} - {}", index_sql, e);
        }
    }

    tracing::debug!("Database indexes created/verified");

    Ok(())
}

/// Set one status on a batch of staged files, chunked to bound statement
/// size. Returns the number of rows changed.
pub async fn set_file_statuses(
    pool: &SqlitePool,
    ids: &[i64],
    status: FileStatus,
) -> Result<u64> {
    let mut changed = 0u64;
    for chunk in ids.chunks(STATUS_BATCH_SIZE) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "UPDATE staged_files SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(status);
        for id in chunk {
            query = query.bind(id);
        }
        changed += query.execute(pool).await?.rows_affected();
    }
    tracing::debug!("Set {} staged file(s) to {}", changed, status.as_str());
    Ok(changed)
}

#[cfg(test)]
pub mod test_util {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use std::str::FromStr;
    use std::time::Duration;

    /// Temp-file pool for tests. Capped at a single connection so that
    /// sequential read-after-write within a test always sees its own writes
    /// (a multi-connection pool hands out different connections per statement
    /// and breaks read-your-writes for this synchronous test code).
    pub async fn test_pool() -> SqlitePool {
        let path = std::env::temp_dir().join(format!("mediarr-test-{}.db", uuid::Uuid::new_v4()));
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .expect("valid sqlite url")
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("open test database");

        super::migrate(&pool).await.expect("migrate test database");
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileStatus;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = test_util::test_pool().await;
        migrate(&pool).await.expect("second migrate");
    }

    #[tokio::test]
    async fn test_set_file_statuses_batches() {
        let pool = test_util::test_pool().await;

        let mut ids = Vec::new();
        for i in 0..(STATUS_BATCH_SIZE + 10) {
            let id: i64 = sqlx::query_scalar(
                r#"INSERT INTO staged_files (directory, file_name, file_kind, size, modified_at)
                   VALUES ('/media', ?, 'video', 1, 0) RETURNING id"#,
            )
            .bind(format!("file{}.mkv", i))
            .fetch_one(&pool)
            .await
            .expect("insert staged file");
            ids.push(id);
        }

        let changed = set_file_statuses(&pool, &ids, FileStatus::Deleted)
            .await
            .expect("bulk update");
        assert_eq!(changed as usize, ids.len());

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM staged_files WHERE status != 'DELETED'")
                .fetch_one(&pool)
                .await
                .expect("count");
        assert_eq!(remaining, 0);
    }
}
