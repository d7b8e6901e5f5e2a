use std::{collections::HashSet, fs};

use rusqlite::Connection;

use super::{remove_page, render, write_page};
use crate::{
    board::Board,
    database::store,
    error::Result,
    templates::{
        models::{PostView, ThreadView},
        ThreadPage,
    },
};

/// Writes `res/<num>.html` and, for long threads, `res/<num>_abbr.html`.
/// A thread that no longer exists has both pages removed.
pub fn build_thread_cache(conn: &Connection, board: &Board, thread: i64) -> Result<()> {
    let full_path = board.path(&board.thread_rel(thread));
    let abbr_path = board.path(&board.thread_abbr_rel(thread));
    let posts = store::thread_posts(conn, &board.name, thread)?;
    let Some((root, replies)) = posts.split_first().filter(|(root, _)| root.num == thread) else {
        remove_page(&full_path)?;
        remove_page(&abbr_path)?;
        return Ok(());
    };

    let link = board.reply_link(thread, 0);
    let view = |shown: &[crate::database::models::Post], omitted: usize| ThreadView {
        num: thread,
        link: link.clone(),
        root: PostView::new(board, root, 0),
        replies: shown.iter().map(|p| PostView::new(board, p, 0)).collect(),
        omitted_posts: omitted,
        omitted_images: replies[..omitted].iter().filter(|p| p.file.is_some()).count(),
    };

    let html = render(&ThreadPage {
        title: &board.cfg.title,
        board_url: board.url(),
        thread: view(replies, 0),
        full_link: None,
    })?;
    write_page(&full_path, &html)?;

    let keep = board.cfg.posts_in_abbreviated_page;
    if keep != 0 && replies.len() > keep {
        let omitted = replies.len() - keep;
        let html = render(&ThreadPage {
            title: &board.cfg.title,
            board_url: board.url(),
            thread: view(&replies[omitted..], omitted),
            full_link: Some(link.clone()),
        })?;
        write_page(&abbr_path, &html)?;
    } else {
        remove_page(&abbr_path)?;
    }
    Ok(())
}

/// Rebuilds every thread page and drops pages of threads that are gone.
pub fn build_all_threads(conn: &Connection, board: &Board) -> Result<()> {
    let live: HashSet<i64> = store::thread_roots(conn, &board.name)?
        .iter()
        .map(|p| p.num)
        .collect();

    for entry in fs::read_dir(board.path(&board.cfg.res_dir))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(stem) = name
            .to_str()
            .and_then(|n| n.strip_suffix(board.cfg.page_ext.as_str()))
        else {
            continue;
        };
        let num = stem.strip_suffix("_abbr").unwrap_or(stem).parse::<i64>();
        if matches!(num, Ok(num) if !live.contains(&num)) {
            remove_page(&entry.path())?;
        }
    }

    for thread in &live {
        build_thread_cache(conn, board, *thread)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BoardConfig, database::store::tests::post, pipeline::upload::tests::test_board,
    };
    use tempfile::TempDir;

    fn seed_thread(conn: &Connection, replies: i64) {
        store::insert_post(conn, "b", &post(1, 0, 100)).unwrap();
        for n in 2..=replies + 1 {
            store::insert_post(conn, "b", &post(n, 1, 100 + n)).unwrap();
        }
    }

    #[test]
    fn full_page_lists_every_post_in_order() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed_thread(&conn, 3);
        build_thread_cache(&conn, &board, 1).unwrap();
        let html = fs::read_to_string(board.path("res/1.html")).unwrap();
        let positions: Vec<usize> = (1..=4)
            .map(|n| html.find(&format!("id=\"{n}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!board.path("res/1_abbr.html").exists());
    }

    #[test]
    fn abbreviated_page_follows_thread_length() {
        let dir = TempDir::new().unwrap();
        let board = test_board(
            &dir,
            BoardConfig {
                posts_in_abbreviated_page: 2,
                ..Default::default()
            },
        );
        let conn = store::open_in_memory().unwrap();
        seed_thread(&conn, 4);
        build_thread_cache(&conn, &board, 1).unwrap();
        let abbr = fs::read_to_string(board.path("res/1_abbr.html")).unwrap();
        assert!(abbr.contains("2 posts omitted"));
        assert!(abbr.contains("id=\"5\""));
        assert!(!abbr.contains("id=\"2\""));

        store::delete_post(&conn, "b", 2).unwrap();
        store::delete_post(&conn, "b", 3).unwrap();
        build_thread_cache(&conn, &board, 1).unwrap();
        assert!(!board.path("res/1_abbr.html").exists());
    }

    #[test]
    fn missing_thread_removes_pages() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed_thread(&conn, 1);
        build_thread_cache(&conn, &board, 1).unwrap();
        assert!(board.path("res/1.html").exists());
        store::delete_post(&conn, "b", 1).unwrap();
        build_thread_cache(&conn, &board, 1).unwrap();
        assert!(!board.path("res/1.html").exists());
    }

    #[test]
    fn rebuilding_all_drops_orphans() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        seed_thread(&conn, 1);
        fs::write(board.path("res/99.html"), "old").unwrap();
        fs::write(board.path("res/99_abbr.html"), "old").unwrap();
        build_all_threads(&conn, &board).unwrap();
        assert!(board.path("res/1.html").exists());
        assert!(!board.path("res/99.html").exists());
        assert!(!board.path("res/99_abbr.html").exists());
    }
}
