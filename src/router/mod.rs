use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};

use crate::{board::Site, database::ExecutorConnection};

mod boards;
mod error;
mod headers;
mod static_files;

#[derive(Clone)]
pub struct AppState {
    db: ExecutorConnection,
    site: Arc<Site>,
}

/// Largest upload any board accepts, plus room for the other form fields.
fn body_limit(site: &Site) -> usize {
    let max_kb = site.boards.values().map(|b| b.cfg.max_kb).max().unwrap_or(0);
    (max_kb as usize + 64) * 1024
}

pub fn build(db: ExecutorConnection, site: Arc<Site>) -> Router {
    Router::new()
        .route("/static/*file", get(static_files::static_handler))
        .route("/:board", get(static_files::board_index))
        .route(
            "/:board/*file",
            get(static_files::board_file).post(boards::handle_action),
        )
        .fallback(|| async { error::http_404() })
        .layer(DefaultBodyLimit::max(body_limit(&site)))
        .with_state(AppState { db, site })
}
