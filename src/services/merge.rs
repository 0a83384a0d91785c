// Field-granular merge of scanner output into catalog records.
//
// Every write is recorded in the per-record override map, so for any field
// one can answer "which source produced this value".

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::settings::Settings;

/// Fields the merge engine manages, with their backing columns.
pub const MERGED_FIELDS: &[&str] = &[
    "title",
    "original_title",
    "plot",
    "year",
    "premiere_date",
    "rating",
    "runtime_minutes",
    "genres",
    "studio",
];

/// A scanner-supplied value for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

fn column_for(field: &str) -> Option<&'static str> {
    MERGED_FIELDS.iter().copied().find(|f| *f == field)
}

pub struct MergeEngine {
    settings: Arc<Settings>,
}

impl MergeEngine {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Write `value` into `field` of a record on behalf of `source`.
    ///
    /// The write happens only if the field is currently empty, the override
    /// policy for this (field, source) pair allows overwriting, or the field's
    /// last-writing source has lower configured priority than `source`. A
    /// source may always refresh a field it wrote itself. Returns whether the
    /// field was written.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        record_id: i64,
        field: &str,
        value: FieldValue,
        source: &str,
    ) -> Result<bool> {
        let Some(column) = column_for(field) else {
            tracing::warn!("Merge skipped unknown field '{}'", field);
            return Ok(false);
        };
        if value.is_empty() {
            return Ok(false);
        }

        let empty = self.field_is_empty(pool, record_id, column).await?;
        let owner = self.field_owner(pool, record_id, field).await?;

        let allowed = match (&owner, empty) {
            (_, true) => true,
            (None, false) => true,
            (Some(owner), false) if owner == source => true,
            (Some(owner), false) => {
                let key = format!("merge.override.{}.{}", field, source);
                if self.settings.get_bool(&key, false).await {
                    true
                } else {
                    self.source_priority(source).await < self.source_priority(owner).await
                }
            }
        };

        if !allowed {
            tracing::debug!(
                "Merge blocked: record {} field '{}' owned by '{}', source '{}' may not overwrite",
                record_id,
                field,
                owner.as_deref().unwrap_or("-"),
                source
            );
            return Ok(false);
        }

        let sql = format!(
            "UPDATE catalog_records SET {} = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            column
        );
        let query = sqlx::query(&sql);
        let query = match &value {
            FieldValue::Text(s) => query.bind(s.clone()),
            FieldValue::Int(i) => query.bind(*i),
            FieldValue::Float(f) => query.bind(*f),
        };
        query.bind(record_id).execute(pool).await?;

        sqlx::query(
            r#"INSERT INTO record_field_sources (record_id, field, source, written_at)
               VALUES (?, ?, ?, CURRENT_TIMESTAMP)
               ON CONFLICT(record_id, field) DO UPDATE SET
                   source = excluded.source,
                   written_at = CURRENT_TIMESTAMP"#,
        )
        .bind(record_id)
        .bind(field)
        .bind(source)
        .execute(pool)
        .await?;

        Ok(true)
    }

    /// Apply a batch of fields from one source; returns how many were written.
    pub async fn apply_fields(
        &self,
        pool: &SqlitePool,
        record_id: i64,
        fields: Vec<(&'static str, FieldValue)>,
        source: &str,
    ) -> Result<u32> {
        let mut written = 0;
        for (field, value) in fields {
            if self.apply(pool, record_id, field, value, source).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// The source that last wrote a field, if any.
    pub async fn field_owner(
        &self,
        pool: &SqlitePool,
        record_id: i64,
        field: &str,
    ) -> Result<Option<String>> {
        let owner = sqlx::query_scalar(
            "SELECT source FROM record_field_sources WHERE record_id = ? AND field = ?",
        )
        .bind(record_id)
        .bind(field)
        .fetch_optional(pool)
        .await?;
        Ok(owner)
    }

    async fn field_is_empty(
        &self,
        pool: &SqlitePool,
        record_id: i64,
        column: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT CASE WHEN {col} IS NULL OR {col} = '' THEN 1 ELSE 0 END
             FROM catalog_records WHERE id = ?",
            col = column
        );
        let empty: i64 = sqlx::query_scalar(&sql)
            .bind(record_id)
            .fetch_one(pool)
            .await?;
        Ok(empty == 1)
    }

    /// Position of a source in `scanner.priority`; unknown sources rank last.
    async fn source_priority(&self, source: &str) -> usize {
        let priority = self.settings.get_list("scanner.priority", "tmdb,anilist").await;
        priority
            .iter()
            .position(|s| s.eq_ignore_ascii_case(source))
            .unwrap_or(usize::MAX)
    }

    /// Drop the override map for a record. Used when the record's kind
    /// changes and recorded provenance no longer applies.
    pub async fn clear_overrides(&self, pool: &SqlitePool, record_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM record_field_sources WHERE record_id = ?")
            .bind(record_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
