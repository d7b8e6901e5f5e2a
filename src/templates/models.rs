use crate::{
    abbrev::abbreviate_html,
    board::Board,
    database::models::{FileRecord, Post},
};

/// A post ready for rendering. Text fields are already HTML-safe.
#[derive(Debug, Clone)]
pub struct PostView {
    pub num: i64,
    pub parent: i64,
    pub link: String,
    pub name: String,
    pub trip: String,
    /// `mailto:` target, empty when no email was given.
    pub email: String,
    pub subject: String,
    pub date: String,
    pub comment: String,
    /// Set when `comment` was cut short for an index page.
    pub abbreviated: bool,
    pub file: Option<FileView>,
    pub admin_post: bool,
    pub stickied: bool,
    pub locked: bool,
}

#[derive(Debug, Clone)]
pub struct FileView {
    pub url: String,
    pub filename: String,
    pub size: String,
    pub width: u32,
    pub height: u32,
    pub thumb: Option<ThumbView>,
}

#[derive(Debug, Clone)]
pub struct ThumbView {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ThreadView {
    pub num: i64,
    pub link: String,
    pub root: PostView,
    pub replies: Vec<PostView>,
    pub omitted_posts: usize,
    pub omitted_images: usize,
}

#[derive(Debug, Clone)]
pub struct PageLink {
    pub num: usize,
    pub url: String,
    pub current: bool,
}

pub fn display_size(bytes: i64) -> String {
    match bytes {
        b if b >= 1024 * 1024 => format!("{:.2} MB", b as f64 / (1024.0 * 1024.0)),
        b if b >= 1024 => format!("{} kB", b / 1024),
        b => format!("{b} B"),
    }
}

impl FileView {
    fn new(board: &Board, file: &FileRecord) -> Self {
        Self {
            url: board.expand_url(&file.path),
            filename: file.path.rsplit('/').next().unwrap_or(&file.path).to_string(),
            size: display_size(file.size),
            width: file.width,
            height: file.height,
            thumb: file.thumbnail.as_ref().map(|t| ThumbView {
                url: board.expand_url(&t.path),
                width: t.width,
                height: t.height,
            }),
        }
    }
}

impl PostView {
    /// `max_lines` of 0 renders the comment whole.
    pub fn new(board: &Board, post: &Post, max_lines: usize) -> Self {
        let (comment, abbreviated) =
            match abbreviate_html(&post.comment, max_lines, board.cfg.approx_line_length) {
                Some(short) => (short, true),
                None => (post.comment.clone(), false),
            };
        Self {
            num: post.num,
            parent: post.parent,
            link: board.reply_link(post.num, post.parent),
            name: post.name.clone(),
            trip: post.trip.clone(),
            email: if post.email.is_empty() {
                String::new()
            } else {
                format!("mailto:{}", post.email)
            },
            subject: post.subject.clone(),
            date: post.date.clone(),
            comment,
            abbreviated,
            file: post.file.as_ref().map(|f| FileView::new(board, f)),
            admin_post: post.admin_post,
            stickied: post.stickied,
            locked: post.locked,
        }
    }
}
