// System info API

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/Info", get(get_system_info))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    pub server_name: String,
    pub version: String,
    pub server_time: String,
    pub staged_files: i64,
    pub pending_files: i64,
    pub catalog_records: i64,
    pub pending_records: i64,
    pub error_records: i64,
}

async fn get_system_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemInfo>, (StatusCode, String)> {
    let internal = |e: sqlx::Error| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());

    let staged_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staged_files")
        .fetch_one(&state.db)
        .await
        .map_err(internal)?;
    let pending_files: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM staged_files WHERE status IN ('NEW', 'UPDATED')",
    )
    .fetch_one(&state.db)
    .await
    .map_err(internal)?;
    let catalog_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_records")
        .fetch_one(&state.db)
        .await
        .map_err(internal)?;
    let pending_records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM catalog_records WHERE status IN ('NEW', 'UPDATED')",
    )
    .fetch_one(&state.db)
    .await
    .map_err(internal)?;
    let error_records: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM catalog_records WHERE status = 'ERROR'")
            .fetch_one(&state.db)
            .await
            .map_err(internal)?;

    Ok(Json(SystemInfo {
        server_name: "mediarr".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        server_time: chrono::Utc::now().to_rfc3339(),
        staged_files,
        pending_files,
        catalog_records,
        pending_records,
        error_records,
    }))
}
