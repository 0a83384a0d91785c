// Catalog record administration API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{CatalogRecord, MediaFile, Season};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_records))
        .route("/:id", get(get_record))
        .route("/:id/Rescan", post(rescan_record))
        .route("/:id/Resolve", post(resolve_record))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CatalogRecord>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let status = query.status.map(|s| s.to_uppercase());
    let kind = query.kind.map(|k| k.to_lowercase());

    let records: Vec<CatalogRecord> = sqlx::query_as(
        r#"SELECT * FROM catalog_records
           WHERE (? IS NULL OR status = ?)
             AND (? IS NULL OR kind = ?)
           ORDER BY created_at DESC, id DESC
           LIMIT ?"#,
    )
    .bind(&status)
    .bind(&status)
    .bind(&kind)
    .bind(&kind)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(records))
}

/// Record detail with its external ids and the per-field override map.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordDetail {
    #[serde(flatten)]
    pub record: CatalogRecord,
    /// source -> external id
    pub external_ids: HashMap<String, String>,
    /// field -> source that last wrote it
    pub field_sources: HashMap<String, String>,
    /// Physical containers carrying this record.
    pub media_files: Vec<MediaFile>,
    /// The season an episode record belongs to.
    pub season: Option<Season>,
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RecordDetail>, (StatusCode, String)> {
    let internal = |e: sqlx::Error| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());

    let record: CatalogRecord = sqlx::query_as("SELECT * FROM catalog_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No catalog record {}", id)))?;

    let external_ids: Vec<(String, String)> = sqlx::query_as(
        "SELECT source, external_id FROM record_external_ids WHERE record_id = ?",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(internal)?;

    let field_sources: Vec<(String, String)> =
        sqlx::query_as("SELECT field, source FROM record_field_sources WHERE record_id = ?")
            .bind(id)
            .fetch_all(&state.db)
            .await
            .map_err(internal)?;

    let media_files: Vec<MediaFile> = sqlx::query_as(
        r#"SELECT m.* FROM media_files m
           JOIN media_file_records mfr ON mfr.media_file_id = m.id
           WHERE mfr.record_id = ?"#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(internal)?;

    let season: Option<Season> = match record.season_id {
        Some(season_id) => sqlx::query_as("SELECT * FROM seasons WHERE id = ?")
            .bind(season_id)
            .fetch_optional(&state.db)
            .await
            .map_err(internal)?,
        None => None,
    };

    Ok(Json(RecordDetail {
        record,
        external_ids: external_ids.into_iter().collect(),
        field_sources: field_sources.into_iter().collect(),
        media_files,
        season,
    }))
}

/// Resolve the record's external id against every registered scanner that
/// handles its kind, without fetching or merging any fields.
async fn resolve_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<HashMap<String, String>>, (StatusCode, String)> {
    let record: CatalogRecord = sqlx::query_as("SELECT * FROM catalog_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No catalog record {}", id)))?;

    let mut resolved = HashMap::new();
    for scanner in state.registry.scanners() {
        if !scanner.supports(record.kind) {
            continue;
        }
        match scanner.resolve_external_id(&state.db, &record).await {
            Ok(Some(external_id)) => {
                resolved.insert(scanner.name().to_string(), external_id);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    "Resolving '{}' via {} failed: {}",
                    record.title,
                    scanner.name(),
                    e
                );
            }
        }
    }

    Ok(Json(resolved))
}

/// Reset a record to UPDATED so the next metadata poll rescans it.
async fn rescan_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let reset = state
        .intake
        .rescan_record(id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if reset {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("No catalog record {}", id)))
    }
}
