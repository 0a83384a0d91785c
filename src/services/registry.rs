// Scanner contract and the explicit registry that fans a record out to every
// enabled source in priority order.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::merge::MergeEngine;
use crate::models::{CatalogRecord, RecordKind, RecordStatus, Series};
use crate::settings::Settings;

/// Outcome of one scanner invocation against one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Ok,
    /// No external id could be resolved for this source.
    MissingId,
    /// Transient failure (network, parse); the record stays unreconciled for
    /// this source only.
    Error,
    /// The source discovered the record is not the expected kind.
    TypeChange(RecordKind),
}

/// Contract every metadata source implements. `scan` must never panic or
/// propagate internal failures; it converts them to [`ScanOutcome::Error`].
#[async_trait]
pub trait MetadataScanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kinds this scanner can handle at all; per-kind enablement can further
    /// be restricted via the `scanner.<name>.<kind>` setting.
    fn supports(&self, kind: RecordKind) -> bool;

    /// Resolve the record's external id for this source: an already-stored id
    /// first, else a title/year lookup. Resolved ids are stored.
    async fn resolve_external_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>>;

    /// Fetch remote data for the record and apply it through the merge
    /// engine.
    async fn scan(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> ScanOutcome;
}

/// Explicit registry of metadata scanners, constructed once at startup and
/// shared by handle. No ambient global state.
pub struct ScannerRegistry {
    scanners: Vec<Arc<dyn MetadataScanner>>,
    settings: Arc<Settings>,
    merge: MergeEngine,
}

impl ScannerRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        let merge = MergeEngine::new(settings.clone());
        Self {
            scanners: Vec::new(),
            settings,
            merge,
        }
    }

    pub fn register(&mut self, scanner: Arc<dyn MetadataScanner>) {
        tracing::info!("Registered metadata scanner '{}'", scanner.name());
        self.scanners.push(scanner);
    }

    pub fn scanner(&self, name: &str) -> Option<&Arc<dyn MetadataScanner>> {
        self.scanners.iter().find(|s| s.name() == name)
    }

    pub fn scanners(&self) -> &[Arc<dyn MetadataScanner>] {
        &self.scanners
    }

    pub fn merge_engine(&self) -> &MergeEngine {
        &self.merge
    }

    /// Scanners applicable to `kind`, priority-listed ones first (in list
    /// order), remaining registered scanners after.
    async fn ordered_scanners(&self, kind: RecordKind) -> Vec<Arc<dyn MetadataScanner>> {
        let priority = self.settings.get_list("scanner.priority", "tmdb,anilist").await;

        let mut ordered: Vec<Arc<dyn MetadataScanner>> = Vec::new();
        for name in &priority {
            if let Some(scanner) = self.scanner(name) {
                ordered.push(scanner.clone());
            }
        }
        for scanner in &self.scanners {
            if !ordered.iter().any(|s| s.name() == scanner.name()) {
                ordered.push(scanner.clone());
            }
        }

        let mut enabled = Vec::new();
        for scanner in ordered {
            let key = format!("scanner.{}.{}", scanner.name(), kind.as_str());
            if self.settings.get_bool(&key, scanner.supports(kind)).await {
                enabled.push(scanner);
            }
        }
        enabled
    }

    /// Run every enabled scanner against one record and persist the
    /// aggregate status. Returns the status the record ended in.
    pub async fn scan_record(&self, pool: &SqlitePool, record_id: i64) -> Result<RecordStatus> {
        let record: CatalogRecord = sqlx::query_as("SELECT * FROM catalog_records WHERE id = ?")
            .bind(record_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("catalog record {} not found", record_id))?;

        let scanners = self.ordered_scanners(record.kind).await;
        if scanners.is_empty() {
            tracing::debug!(
                "No scanner enabled for {} record {} ('{}')",
                record.kind.as_str(),
                record.id,
                record.title
            );
            self.finish(pool, record.id, RecordStatus::Done).await?;
            return Ok(RecordStatus::Done);
        }

        let mut ok_count: i64 = 0;
        for scanner in scanners {
            match scanner.scan(pool, &record, &self.merge).await {
                ScanOutcome::Ok => {
                    tracing::debug!(
                        "Scanner '{}' OK for record {} ('{}')",
                        scanner.name(),
                        record.id,
                        record.title
                    );
                    ok_count += 1;
                }
                ScanOutcome::MissingId => {
                    tracing::debug!(
                        "Scanner '{}' found no external id for record {} ('{}')",
                        scanner.name(),
                        record.id,
                        record.title
                    );
                }
                ScanOutcome::Error => {
                    tracing::warn!(
                        "Scanner '{}' failed for record {} ('{}')",
                        scanner.name(),
                        record.id,
                        record.title
                    );
                }
                ScanOutcome::TypeChange(new_kind) => {
                    return self.change_kind(pool, &record, new_kind).await;
                }
            }
        }

        let min_success = self.settings.get_int("scanner.min_success", 1).await.max(1);
        let status = if ok_count >= min_success {
            RecordStatus::Done
        } else {
            RecordStatus::Error
        };
        self.finish(pool, record.id, status).await?;
        Ok(status)
    }

    async fn finish(&self, pool: &SqlitePool, record_id: i64, status: RecordStatus) -> Result<()> {
        sqlx::query(
            r#"UPDATE catalog_records
               SET status = ?, scan_attempts = scan_attempts + 1,
                   updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(status)
        .bind(record_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// A source discovered the record's real kind. Flip it and reset the
    /// record to UPDATED so the next tick rescans it under the new kind. The
    /// override map is cleared: provenance recorded under the wrong kind is
    /// not trustworthy.
    async fn change_kind(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        new_kind: RecordKind,
    ) -> Result<RecordStatus> {
        tracing::warn!(
            "Record {} ('{}') changed kind: {} -> {}",
            record.id,
            record.title,
            record.kind.as_str(),
            new_kind.as_str()
        );
        self.merge.clear_overrides(pool, record.id).await?;
        sqlx::query(
            r#"UPDATE catalog_records
               SET kind = ?, status = 'UPDATED', scan_attempts = scan_attempts + 1,
                   updated_at = CURRENT_TIMESTAMP
               WHERE id = ?"#,
        )
        .bind(new_kind)
        .bind(record.id)
        .execute(pool)
        .await?;
        Ok(RecordStatus::Updated)
    }
}

// Shared helpers for external-id bookkeeping, used by the concrete scanners.

pub async fn stored_external_id(
    pool: &SqlitePool,
    record_id: i64,
    source: &str,
) -> Result<Option<String>> {
    let id = sqlx::query_scalar(
        "SELECT external_id FROM record_external_ids WHERE record_id = ? AND source = ?",
    )
    .bind(record_id)
    .bind(source)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn store_external_id(
    pool: &SqlitePool,
    record_id: i64,
    source: &str,
    external_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO record_external_ids (record_id, source, external_id)
           VALUES (?, ?, ?)
           ON CONFLICT(record_id, source) DO UPDATE SET external_id = excluded.external_id"#,
    )
    .bind(record_id)
    .bind(source)
    .bind(external_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stored_series_external_id(
    pool: &SqlitePool,
    series_id: i64,
    source: &str,
) -> Result<Option<String>> {
    let id = sqlx::query_scalar(
        "SELECT external_id FROM series_external_ids WHERE series_id = ? AND source = ?",
    )
    .bind(series_id)
    .bind(source)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn store_series_external_id(
    pool: &SqlitePool,
    series_id: i64,
    source: &str,
    external_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO series_external_ids (series_id, source, external_id)
           VALUES (?, ?, ?)
           ON CONFLICT(series_id, source) DO UPDATE SET external_id = excluded.external_id"#,
    )
    .bind(series_id)
    .bind(source)
    .bind(external_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The series an episode record belongs to, through its season link.
pub async fn series_for_record(
    pool: &SqlitePool,
    record: &CatalogRecord,
) -> Result<Option<Series>> {
    let Some(season_id) = record.season_id else {
        return Ok(None);
    };
    let series = sqlx::query_as(
        r#"SELECT s.* FROM series s
           JOIN seasons se ON se.series_id = s.id
           WHERE se.id = ?"#,
    )
    .bind(season_id)
    .fetch_optional(pool)
    .await?;
    Ok(series)
}
