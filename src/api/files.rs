// Staged file administration API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::StagedFile;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_files))
        .route("/:id/Rescan", post(rescan_file))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StagedFile>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let files: Vec<StagedFile> = match &query.status {
        Some(status) => sqlx::query_as(
            "SELECT * FROM staged_files WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(status.to_uppercase())
        .bind(limit)
        .fetch_all(&state.db)
        .await,
        None => sqlx::query_as(
            "SELECT * FROM staged_files ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&state.db)
        .await,
    }
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(files))
}

/// Reset a staged file to UPDATED so the next poll picks it up again.
async fn rescan_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let reset = state
        .intake
        .rescan_file(id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if reset {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("No staged file {}", id)))
    }
}
