use askama::Template;

use self::models::{PageLink, ThreadView};

pub mod models;

#[derive(Template)]
#[template(path = "board.html")]
pub struct BoardPage<'a> {
    pub title: &'a str,
    pub board_url: &'a str,
    pub threads: Vec<ThreadView>,
    pub pages: Vec<PageLink>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

#[derive(Template)]
#[template(path = "thread.html")]
pub struct ThreadPage<'a> {
    pub title: &'a str,
    pub board_url: &'a str,
    pub thread: ThreadView,
    /// Link to the full page when this is the abbreviated one.
    pub full_link: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage {
    pub title: String,
    pub message: String,
}
