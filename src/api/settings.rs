// Settings administration API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/:key", get(get_setting).put(put_setting))
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingBody {
    pub value: String,
}

async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SettingResponse>, (StatusCode, String)> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(&key)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match value {
        Some(value) => Ok(Json(SettingResponse { key, value })),
        None => Err((StatusCode::NOT_FOUND, format!("No setting '{}'", key))),
    }
}

async fn put_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<SettingBody>,
) -> Result<Json<SettingResponse>, (StatusCode, String)> {
    state
        .settings
        .set(&key, &body.value)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!("Setting '{}' updated", key);

    Ok(Json(SettingResponse {
        key,
        value: body.value,
    }))
}
