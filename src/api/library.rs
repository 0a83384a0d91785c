// Ingest API: entry point for the external file-scanning collaborator.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::intake::IngestSummary;
use crate::models::DirectoryDescriptor;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/Ingest", post(ingest_directories))
        .route("/Sweep", post(sweep_deleted))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestResponse {
    pub directories: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped: u32,
}

/// Consume an ordered sequence of directory descriptors.
async fn ingest_directories(
    State(state): State<Arc<AppState>>,
    Json(directories): Json<Vec<DirectoryDescriptor>>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let mut total = IngestSummary::default();
    let count = directories.len() as u32;

    for dir in &directories {
        let summary = state
            .intake
            .ingest_directory(dir)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        total.created += summary.created;
        total.updated += summary.updated;
        total.unchanged += summary.unchanged;
        total.skipped += summary.skipped;
    }

    Ok(Json(IngestResponse {
        directories: count,
        created: total.created,
        updated: total.updated,
        unchanged: total.unchanged,
        skipped: total.skipped,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SweepResponse {
    pub marked_deleted: u64,
}

async fn sweep_deleted(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, (StatusCode, String)> {
    let marked_deleted = state
        .intake
        .sweep_deleted()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(SweepResponse { marked_deleted }))
}
