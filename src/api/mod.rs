use axum::Router;
use std::sync::Arc;

use crate::AppState;

mod files;
mod library;
mod records;
mod settings;
mod system;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/System", system::routes())
        .nest("/Library", library::routes())
        .nest("/Files", files::routes())
        .nest("/Records", records::routes())
        .nest("/Settings", settings::routes())
}
