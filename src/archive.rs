//! Deleting posts, archiving their files, and the backup store.

use std::{fs, io, path::Path};

use rusqlite::Connection;

use crate::{
    board::{Board, Site},
    cache::{self, thread::build_thread_cache},
    database::{
        models::{FileRecord, Post},
        store,
    },
    error::{PostError, Result},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Only remove the attached file, keeping the post.
    pub file_only: bool,
    /// Move files and the thread page into the archive tree.
    pub archive: bool,
    /// Keep a restorable copy of each deleted row.
    pub backup: bool,
}

/// Board-relative paths of the files a post owns. Icons and thumbnails that
/// are the source image itself are not counted twice.
fn owned_files(board: &Board, file: &FileRecord) -> Vec<String> {
    let mut paths = vec![file.path.clone()];
    if let Some(thumb) = &file.thumbnail {
        if thumb.path != file.path && board.owns_thumbnail(&thumb.path) {
            paths.push(thumb.path.clone());
        }
    }
    paths
}

/// Moves a file, creating the destination directory. A missing source is
/// not an error.
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(dir) = to.parent() {
        fs::create_dir_all(dir)?;
    }
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn dispose_files(board: &Board, file: &FileRecord, opts: DeleteOptions) -> io::Result<()> {
    for rel in owned_files(board, file) {
        let live = board.path(&rel);
        if opts.archive {
            relocate(&live, &board.archive_path(&rel))?;
        } else if opts.backup {
            relocate(&live, &board.backup_path(&rel))?;
        } else {
            remove(&live)?;
        }
    }
    Ok(())
}

/// Copies a thread page into the archive tree with file links pointing at
/// the archived copies.
fn archive_thread_page(board: &Board, thread: i64) -> io::Result<()> {
    let rel = board.thread_rel(thread);
    let html = match fs::read_to_string(board.path(&rel)) {
        Ok(html) => html,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let cfg = &board.cfg;
    let mut archived = html;
    for dir in [&cfg.img_dir, &cfg.thumb_dir] {
        let live = format!("\"{}{}/", board.url(), dir);
        let moved = format!("\"{}{}/{}/", board.url(), cfg.archive_dir, dir);
        archived = archived.replace(&live, &moved);
    }
    cache::write_page(&board.archive_path(&rel), &archived)
}

/// Deletes a post, or a whole thread when `num` is a root. Rows go first in
/// one transaction, then files move or disappear. Thread pages are updated;
/// the index is left to the caller.
pub fn delete_post(conn: &mut Connection, board: &Board, num: i64, opts: DeleteOptions, now: i64) -> Result<()> {
    let post = store::get_post(conn, &board.name, num)?.ok_or(PostError::NoRecord)?;

    if opts.file_only {
        if let Some(file) = &post.file {
            store::clear_file(conn, &board.name, num)?;
            let plain = DeleteOptions {
                archive: false,
                backup: false,
                ..opts
            };
            dispose_files(board, file, plain)?;
            build_thread_cache(conn, board, post.thread())?;
        }
        return Ok(());
    }

    let posts = if post.is_root() {
        store::thread_posts(conn, &board.name, num)?
    } else {
        vec![post.clone()]
    };

    let tx = conn.transaction()?;
    for p in &posts {
        if opts.backup {
            store::insert_backup(&tx, &board.name, p, now)?;
        }
        store::delete_post(&tx, &board.name, p.num)?;
    }
    tx.commit()?;

    for file in posts.iter().filter_map(|p| p.file.as_ref()) {
        dispose_files(board, file, opts)?;
    }

    if post.is_root() {
        if opts.archive {
            archive_thread_page(board, num)?;
        }
        build_thread_cache(conn, board, num)?;
    } else {
        build_thread_cache(conn, board, post.parent)?;
    }
    tracing::info!(
        "Deleted /{}/{} ({} row(s){})",
        board.name,
        num,
        posts.len(),
        if opts.archive { ", archived" } else { "" }
    );
    Ok(())
}

/// Deletes the least wanted threads while the board is over any of its
/// limits. Returns the deleted thread numbers.
pub fn trim_board(conn: &mut Connection, board: &Board, backup: bool, now: i64) -> Result<Vec<i64>> {
    let cfg = &board.cfg;
    let opts = DeleteOptions {
        file_only: false,
        archive: cfg.archive_mode,
        backup,
    };
    let mut trimmed = Vec::new();
    while let Some((num, created)) = store::trim_candidate(conn, &board.name, cfg.trim_method)? {
        let totals = store::totals(conn, &board.name)?;
        let over = (cfg.max_threads > 0 && totals.threads > cfg.max_threads)
            || (cfg.max_posts > 0 && totals.posts > cfg.max_posts)
            || (cfg.max_megabytes > 0 && totals.bytes > cfg.max_megabytes * 1024 * 1024)
            || (cfg.max_age > 0 && created < now - cfg.max_age * 3600);
        if !over {
            break;
        }
        delete_post(conn, board, num, opts, now)?;
        trimmed.push(num);
    }
    if !trimmed.is_empty() {
        tracing::info!("Trimmed {} thread(s) from /{}/", trimmed.len(), board.name);
    }
    Ok(trimmed)
}

fn restore_files(board: &Board, file: &FileRecord) -> io::Result<()> {
    for rel in owned_files(board, file) {
        let backed_up = board.backup_path(&rel);
        let from = if backed_up.exists() {
            backed_up
        } else {
            board.archive_path(&rel)
        };
        relocate(&from, &board.path(&rel))?;
    }
    Ok(())
}

/// Puts a backed-up post back. A reply joins its live thread and takes on
/// the thread's flags and activity time; a root brings its backed-up
/// replies along. Returns the thread to rebuild.
pub fn restore_backup(conn: &mut Connection, board: &Board, id: i64) -> Result<i64> {
    let backup = store::get_backup(conn, id)?
        .filter(|b| b.board == board.name)
        .ok_or(PostError::NoRecord)?;
    if store::get_post(conn, &board.name, backup.post.num)?.is_some() {
        return Err(PostError::Internal(format!(
            "post {} is already live",
            backup.post.num
        )));
    }

    let mut restored = vec![(backup.id, backup.post)];
    let (thread, inherit) = if restored[0].1.is_root() {
        let root = &restored[0].1;
        let thread = root.num;
        let inherit = (root.stickied, root.locked, root.lasthit);
        for reply in store::backup_replies(conn, &board.name, thread)? {
            if store::get_post(conn, &board.name, reply.post.num)?.is_none() {
                restored.push((reply.id, reply.post));
            }
        }
        (thread, inherit)
    } else {
        let parent = store::get_post(conn, &board.name, restored[0].1.parent)?
            .ok_or(PostError::NoThread)?;
        (parent.num, (parent.stickied, parent.locked, parent.lasthit))
    };

    let tx = conn.transaction()?;
    for (id, post) in &mut restored {
        (post.stickied, post.locked, post.lasthit) = inherit;
        store::insert_post(&tx, &board.name, post)?;
        store::delete_backup(&tx, *id)?;
    }
    tx.commit()?;

    for file in restored.iter().filter_map(|(_, p)| p.file.as_ref()) {
        restore_files(board, file)?;
    }
    tracing::info!(
        target: "moderation",
        "Restored /{}/{} from backup {id} ({} post(s))",
        board.name,
        restored[0].1.num,
        restored.len()
    );
    Ok(thread)
}

fn drop_backup_files(board: &Board, post: &Post) -> io::Result<()> {
    if let Some(file) = &post.file {
        for rel in owned_files(board, file) {
            remove(&board.backup_path(&rel))?;
        }
    }
    Ok(())
}

/// Permanently removes one backup and its files.
pub fn remove_backup(conn: &Connection, board: &Board, id: i64) -> Result<()> {
    let backup = store::get_backup(conn, id)?
        .filter(|b| b.board == board.name)
        .ok_or(PostError::NoRecord)?;
    store::delete_backup(conn, id)?;
    drop_backup_files(board, &backup.post)?;
    Ok(())
}

/// Purges backups older than the configured retention. Returns how many
/// were removed.
pub fn purge_backups(conn: &Connection, site: &Site, now: i64) -> Result<usize> {
    if site.cfg.backup_expire <= 0 {
        return Ok(0);
    }
    let expired = store::expired_backups(conn, now - site.cfg.backup_expire)?;
    for backup in &expired {
        store::delete_backup(conn, backup.id)?;
        match site.board(&backup.board) {
            Some(board) => drop_backup_files(board, &backup.post)?,
            None => tracing::warn!("Backup {} belongs to unknown board /{}/", backup.id, backup.board),
        }
    }
    if !expired.is_empty() {
        tracing::info!(target: "moderation", "Purged {} expired backup(s)", expired.len());
    }
    Ok(expired.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BoardConfig, TrimMethod},
        database::{models::Thumbnail, store::tests::post},
        pipeline::upload::tests::test_board,
    };
    use tempfile::TempDir;

    fn with_file(board: &Board, mut p: Post) -> Post {
        let image = format!("src/{}.png", p.num);
        let thumb = format!("thumb/{}s.jpg", p.num);
        fs::write(board.path(&image), b"img").unwrap();
        fs::write(board.path(&thumb), b"tn").unwrap();
        p.file = Some(FileRecord {
            path: image,
            size: 3,
            md5: Some(format!("m{}", p.num)),
            width: 10,
            height: 10,
            thumbnail: Some(Thumbnail {
                path: thumb,
                width: 5,
                height: 5,
            }),
        });
        p
    }

    fn setup(cfg: BoardConfig) -> (TempDir, Board, Connection) {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let root = with_file(&board, post(1, 0, 100));
        let reply = with_file(&board, post(2, 1, 200));
        store::insert_post(&conn, "b", &root).unwrap();
        store::insert_post(&conn, "b", &reply).unwrap();
        build_thread_cache(&conn, &board, 1).unwrap();
        (dir, board, conn)
    }

    #[test]
    fn deleting_a_reply_rebuilds_its_thread() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        delete_post(&mut conn, &board, 2, DeleteOptions::default(), 300).unwrap();
        assert!(store::get_post(&conn, "b", 2).unwrap().is_none());
        assert!(!board.path("src/2.png").exists());
        assert!(!board.path("thumb/2s.jpg").exists());
        let page = fs::read_to_string(board.path("res/1.html")).unwrap();
        assert!(!page.contains("id=\"2\""));
    }

    #[test]
    fn deleting_a_root_takes_the_thread() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        delete_post(&mut conn, &board, 1, DeleteOptions::default(), 300).unwrap();
        assert!(store::thread_posts(&conn, "b", 1).unwrap().is_empty());
        assert!(!board.path("res/1.html").exists());
        assert!(!board.path("src/1.png").exists());
        assert!(!board.path("src/2.png").exists());
    }

    #[test]
    fn file_only_keeps_the_post() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        let opts = DeleteOptions {
            file_only: true,
            ..Default::default()
        };
        delete_post(&mut conn, &board, 2, opts, 300).unwrap();
        let p = store::get_post(&conn, "b", 2).unwrap().unwrap();
        assert!(p.file.is_none());
        assert!(!board.path("src/2.png").exists());
    }

    #[test]
    fn archiving_moves_files_and_rewrites_page() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        let opts = DeleteOptions {
            archive: true,
            ..Default::default()
        };
        delete_post(&mut conn, &board, 1, opts, 300).unwrap();
        assert!(board.archive_path("src/1.png").exists());
        assert!(board.archive_path("thumb/2s.jpg").exists());
        assert!(!board.path("src/1.png").exists());
        let page = fs::read_to_string(board.archive_path("res/1.html")).unwrap();
        assert!(page.contains("\"/b/arch/src/1.png\""));
        assert!(!page.contains("\"/b/src/"));
        assert!(!board.path("res/1.html").exists());
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        let opts = DeleteOptions {
            backup: true,
            ..Default::default()
        };
        delete_post(&mut conn, &board, 1, opts, 300).unwrap();
        assert!(board.backup_path("src/2.png").exists());
        let root_backup = store::expired_backups(&conn, 300)
            .unwrap()
            .into_iter()
            .find(|b| b.post.num == 1)
            .unwrap();
        assert_eq!(root_backup.archived_at, 300);

        assert_eq!(restore_backup(&mut conn, &board, root_backup.id).unwrap(), 1);
        let thread = store::thread_posts(&conn, "b", 1).unwrap();
        assert_eq!(thread.iter().map(|p| p.num).collect::<Vec<_>>(), vec![1, 2]);
        assert!(board.path("src/1.png").exists());
        assert!(board.path("thumb/2s.jpg").exists());
        assert!(store::expired_backups(&conn, i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn restored_reply_inherits_thread_state() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        let opts = DeleteOptions {
            backup: true,
            ..Default::default()
        };
        delete_post(&mut conn, &board, 2, opts, 300).unwrap();
        store::set_locked(&conn, "b", 1, true).unwrap();
        store::bump_thread(&conn, "b", 1, 999).unwrap();
        let id = store::expired_backups(&conn, 300).unwrap()[0].id;
        restore_backup(&mut conn, &board, id).unwrap();
        let reply = store::get_post(&conn, "b", 2).unwrap().unwrap();
        assert!(reply.locked);
        assert_eq!(reply.lasthit, 999);
    }

    #[test]
    fn orphaned_reply_cannot_be_restored() {
        let (_dir, board, mut conn) = setup(BoardConfig::default());
        let opts = DeleteOptions {
            backup: true,
            ..Default::default()
        };
        delete_post(&mut conn, &board, 2, opts, 300).unwrap();
        delete_post(&mut conn, &board, 1, DeleteOptions::default(), 300).unwrap();
        let id = store::expired_backups(&conn, 300).unwrap()[0].id;
        assert!(matches!(
            restore_backup(&mut conn, &board, id),
            Err(PostError::NoThread)
        ));
    }

    #[test]
    fn purge_removes_old_backups_and_files() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            root: Some(dir.path().to_path_buf()),
            file_command: String::new(),
            ..Default::default()
        };
        let mut site_cfg: crate::config::Config =
            toml::from_str("log_level = \"info\"\nlisten = \"127.0.0.1:0\"\nbackup_expire = 100\n").unwrap();
        site_cfg.boards.insert("b".into(), cfg);
        let site = Site::new(site_cfg).unwrap();
        let board = site.board("b").unwrap();
        let mut conn = store::open_in_memory().unwrap();
        store::insert_post(&conn, "b", &with_file(board, post(1, 0, 100))).unwrap();
        let opts = DeleteOptions {
            backup: true,
            ..Default::default()
        };
        delete_post(&mut conn, board, 1, opts, 1000).unwrap();
        assert_eq!(purge_backups(&conn, &site, 1050).unwrap(), 0);
        assert_eq!(purge_backups(&conn, &site, 1100).unwrap(), 1);
        assert!(!board.backup_path("src/1.png").exists());
    }

    #[test]
    fn trimming_respects_limits_and_stickies() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            max_threads: 2,
            trim_method: TrimMethod::Oldest,
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let mut conn = store::open_in_memory().unwrap();
        for n in 1..=4 {
            store::insert_post(&conn, "b", &post(n, 0, 100 * n)).unwrap();
        }
        store::set_stickied(&conn, "b", 1, true).unwrap();
        let trimmed = trim_board(&mut conn, &board, false, 1000).unwrap();
        assert_eq!(trimmed, vec![2, 3]);
        let left: Vec<i64> = store::thread_roots(&conn, "b").unwrap().iter().map(|p| p.num).collect();
        assert_eq!(left, vec![1, 4]);
    }

    #[test]
    fn trimming_by_age() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            max_age: 1,
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let mut conn = store::open_in_memory().unwrap();
        store::insert_post(&conn, "b", &post(1, 0, 0)).unwrap();
        store::insert_post(&conn, "b", &post(2, 0, 5000)).unwrap();
        assert_eq!(trim_board(&mut conn, &board, false, 5000).unwrap(), vec![1]);
    }
}
