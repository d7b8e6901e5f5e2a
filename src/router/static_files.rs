use std::path::{Component, Path as FsPath};

use askama_axum::IntoResponse;
use axum::{
    body::{boxed, Full, StreamBody},
    extract::{Path, State},
    http::header,
    response::Response,
};
use rust_embed::RustEmbed;
use tokio_util::io::ReaderStream;

use super::{error, AppState};

#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticFiles;

pub async fn static_handler(Path(file): Path<String>) -> Response {
    let path = file.trim_start_matches('/');
    match StaticFiles::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                boxed(Full::from(content.data)),
            )
                .into_response()
        }
        None => error::http_404(),
    }
}

fn is_safe(rel: &str) -> bool {
    FsPath::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// Streams a generated page or an upload out of the board directory.
async fn serve(state: &AppState, board: &str, rel: &str) -> Response {
    let Some(board) = state.site.board(board) else {
        return error::http_404();
    };
    if !is_safe(rel) {
        return error::http_404();
    }
    let mut path = board.path(rel);
    if rel.is_empty() || path.is_dir() {
        path = path.join(&board.cfg.html_self);
    }
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("{}: {e}", path.display());
            return error::http_404();
        }
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.as_ref().to_string())],
        StreamBody::new(ReaderStream::new(file)),
    )
        .into_response()
}

pub async fn board_index(State(state): State<AppState>, Path(board): Path<String>) -> Response {
    serve(&state, &board, "").await
}

pub async fn board_file(State(state): State<AppState>, Path((board, file)): Path<(String, String)>) -> Response {
    serve(&state, &board, file.trim_start_matches('/')).await
}
