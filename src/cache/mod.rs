//! Regeneration of the static pages served for each board.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use askama::Template;
use rusqlite::Connection;
use tempfile::NamedTempFile;

use crate::{
    board::Board,
    database::{models::Post, store},
    error::{PostError, Result},
    templates::{
        models::{PageLink, PostView, ThreadView},
        BoardPage,
    },
};

pub mod thread;

/// Replaces `path` with `html` through a temporary file in the same
/// directory, so readers see either the old page or the new one.
pub fn write_page(path: &Path, html: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(html.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Removes a generated page; a page that is already gone is fine.
pub fn remove_page(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub(crate) fn render<T: Template>(page: &T) -> Result<String> {
    page.render()
        .map_err(|e| PostError::Internal(format!("template rendering failed: {e}")))
}

/// The index-page view of a thread: the newest replies that fit under the
/// reply and image caps, dropping the oldest first.
pub fn index_thread_view(board: &Board, root: &Post, replies: &[Post]) -> ThreadView {
    let cfg = &board.cfg;
    let max_replies = if root.stickied {
        cfg.replies_per_sticky
    } else {
        cfg.replies_per_thread
    };
    let mut images = replies.iter().filter(|p| p.file.is_some()).count();
    let max_images = match cfg.image_replies_per_thread {
        0 => images,
        cap => cap,
    };

    let mut start = 0;
    let mut omitted_images = 0;
    while replies.len() - start > max_replies || images > max_images {
        if replies[start].file.is_some() {
            images -= 1;
            omitted_images += 1;
        }
        start += 1;
    }

    let lines = cfg.max_lines_shown;
    ThreadView {
        num: root.num,
        link: board.reply_link(root.num, 0),
        root: PostView::new(board, root, lines),
        replies: replies[start..]
            .iter()
            .map(|p| PostView::new(board, p, lines))
            .collect(),
        omitted_posts: start,
        omitted_images,
    }
}

/// Rebuilds every index page of the board and removes numbered pages left
/// over from a larger board. Returns the number of pages written.
pub fn build_cache(conn: &Connection, board: &Board) -> Result<usize> {
    let roots = store::thread_roots(conn, &board.name)?;
    let per_page = board.cfg.images_per_page.max(1);
    let total = ((roots.len() + per_page - 1) / per_page).max(1);
    let page_url = |n: usize| board.expand_url(&board.page_filename(n));

    for page in 0..total {
        let mut threads = Vec::new();
        for root in roots.iter().skip(page * per_page).take(per_page) {
            let posts = store::thread_posts(conn, &board.name, root.num)?;
            threads.push(index_thread_view(board, root, posts.get(1..).unwrap_or_default()));
        }
        let html = render(&BoardPage {
            title: &board.cfg.title,
            board_url: board.url(),
            threads,
            pages: (0..total)
                .map(|n| PageLink {
                    num: n,
                    url: page_url(n),
                    current: n == page,
                })
                .collect(),
            prev: (page > 0).then(|| page_url(page - 1)),
            next: (page + 1 < total).then(|| page_url(page + 1)),
        })?;
        write_page(&board.page_path(page), &html)?;
    }

    remove_stale_pages(board, total)?;
    tracing::debug!("Rebuilt {total} index page(s) for /{}/", board.name);
    Ok(total)
}

fn remove_stale_pages(board: &Board, total: usize) -> io::Result<()> {
    for entry in fs::read_dir(board.root())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stale = name
            .strip_suffix(board.cfg.page_ext.as_str())
            .and_then(|n| n.parse::<usize>().ok())
            .map_or(false, |n| n >= total && n != 0);
        if stale && name != board.cfg.html_self {
            remove_page(&entry.path())?;
        }
    }
    Ok(())
}

/// Regenerates every page of a board from the rows alone.
pub fn rebuild_board(conn: &Connection, board: &Board) -> Result<()> {
    thread::build_all_threads(conn, board)?;
    build_cache(conn, board)?;
    tracing::info!("Rebuilt all pages of /{}/", board.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BoardConfig,
        database::{models::FileRecord, store::tests::post},
        pipeline::upload::tests::test_board,
    };
    use tempfile::TempDir;

    fn seed(conn: &Connection, threads: i64) {
        for n in 1..=threads {
            store::insert_post(conn, "b", &post(n, 0, 1000 + n)).unwrap();
        }
    }

    fn page(board: &Board, n: usize) -> String {
        fs::read_to_string(board.page_path(n)).unwrap()
    }

    fn thread_ids(html: &str) -> Vec<i64> {
        html.match_indices("<div class=\"thread\" id=\"")
            .map(|(i, m)| {
                let rest = &html[i + m.len()..];
                rest[..rest.find('"').unwrap()].parse().unwrap()
            })
            .collect()
    }

    #[test]
    fn paginates_in_thread_order() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed(&conn, 25);
        assert_eq!(build_cache(&conn, &board).unwrap(), 3);

        let mut seen = Vec::new();
        for n in 0..3 {
            seen.extend(thread_ids(&page(&board, n)));
        }
        // newest activity first
        assert_eq!(seen, (1..=25).rev().collect::<Vec<i64>>());
        assert!(!board.page_path(3).exists());
        assert!(page(&board, 0).contains("/b/1.html"));
    }

    #[test]
    fn stickies_lead() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed(&conn, 3);
        store::set_stickied(&conn, "b", 1, true).unwrap();
        build_cache(&conn, &board).unwrap();
        assert_eq!(thread_ids(&page(&board, 0)), vec![1, 3, 2]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed(&conn, 12);
        build_cache(&conn, &board).unwrap();
        let first = (page(&board, 0), page(&board, 1));
        build_cache(&conn, &board).unwrap();
        assert_eq!(first, (page(&board, 0), page(&board, 1)));
    }

    #[test]
    fn shrinking_board_drops_stale_pages() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed(&conn, 25);
        build_cache(&conn, &board).unwrap();
        assert!(board.page_path(2).exists());
        for n in 1..=20 {
            store::delete_post(&conn, "b", n).unwrap();
        }
        assert_eq!(build_cache(&conn, &board).unwrap(), 1);
        assert!(!board.page_path(1).exists());
        assert!(!board.page_path(2).exists());
    }

    #[test]
    fn empty_board_still_has_a_front_page() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        assert_eq!(build_cache(&conn, &board).unwrap(), 1);
        assert!(thread_ids(&page(&board, 0)).is_empty());
    }

    fn with_file(mut p: Post) -> Post {
        p.file = Some(FileRecord {
            path: format!("src/{}.png", p.num),
            size: 10,
            md5: Some(format!("md5-{}", p.num)),
            width: 10,
            height: 10,
            thumbnail: None,
        });
        p
    }

    #[test]
    fn trims_oldest_replies_and_counts_images() {
        let dir = TempDir::new().unwrap();
        let board = test_board(
            &dir,
            BoardConfig {
                replies_per_thread: 3,
                image_replies_per_thread: 1,
                ..Default::default()
            },
        );
        let root = post(1, 0, 100);
        let replies: Vec<Post> = (2..=7)
            .map(|n| {
                let p = post(n, 1, 100 + n);
                if n % 2 == 0 {
                    with_file(p)
                } else {
                    p
                }
            })
            .collect();
        // images on 2, 4 and 6; dropping 2..=4 satisfies both caps
        let view = index_thread_view(&board, &root, &replies);
        assert_eq!(view.replies.iter().map(|p| p.num).collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(view.omitted_posts, 3);
        assert_eq!(view.omitted_images, 2);
    }

    #[test]
    fn sticky_threads_use_their_own_cap() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let mut root = post(1, 0, 100);
        root.stickied = true;
        let replies: Vec<Post> = (2..=4).map(|n| post(n, 1, 100 + n)).collect();
        let view = index_thread_view(&board, &root, &replies);
        assert_eq!(view.replies.len(), 1);
        assert_eq!(view.omitted_posts, 2);
    }

    #[test]
    fn long_comments_are_abbreviated_on_the_index() {
        let dir = TempDir::new().unwrap();
        let board = test_board(
            &dir,
            BoardConfig {
                max_lines_shown: 2,
                ..Default::default()
            },
        );
        let mut root = post(1, 0, 100);
        root.comment = "a<br />b<br />c<br />d".into();
        let view = index_thread_view(&board, &root, &[]);
        assert!(view.root.abbreviated);
        assert_eq!(view.root.comment, "a<br />b<br />");
    }
}
