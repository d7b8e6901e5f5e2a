//! Row-level access to the post store. Every function takes a plain
//! connection so callers can run them inside a transaction.

use rusqlite::{params, Connection, OptionalExtension};

use super::{
    models::{Backup, BoardTotals, Post, Report},
    queries,
};
use crate::config::TrimMethod;

pub type Result<T> = rusqlite::Result<T>;

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(conn)
}

/// Allocates the next post number for a board.
pub fn next_num(conn: &Connection, board: &str) -> Result<i64> {
    conn.prepare_cached(queries::NEXT_NUM)?
        .query_row(params![board], |row| row.get(0))
}

fn insert_with(conn: &Connection, sql: &str, board: &str, post: &Post, archived_at: Option<i64>) -> Result<()> {
    let file = post.file.as_ref();
    let thumb = file.and_then(|f| f.thumbnail.as_ref());
    let mut stmt = conn.prepare_cached(sql)?;
    let values = params![
        board,
        post.num,
        post.parent,
        post.timestamp,
        post.lasthit,
        post.ip,
        post.date,
        post.name,
        post.trip,
        post.email,
        post.subject,
        post.password,
        post.comment,
        file.map(|f| &f.path),
        file.map_or(0, |f| f.size),
        file.and_then(|f| f.md5.as_ref()),
        file.map_or(0, |f| f.width),
        file.map_or(0, |f| f.height),
        thumb.map(|t| &t.path),
        thumb.map_or(0, |t| t.width),
        thumb.map_or(0, |t| t.height),
        post.lastedit,
        post.lastedit_ip,
        post.admin_post,
        post.stickied,
        post.locked,
    ];
    match archived_at {
        Some(at) => {
            let mut all = values.to_vec();
            all.push(&at);
            stmt.execute(&*all)?;
        }
        None => {
            stmt.execute(values)?;
        }
    }
    Ok(())
}

pub fn insert_post(conn: &Connection, board: &str, post: &Post) -> Result<()> {
    insert_with(conn, queries::INSERT_POST, board, post, None)?;
    // restored posts carry their old number
    conn.prepare_cached(queries::RAISE_COUNTER)?
        .execute(params![board, post.num])?;
    Ok(())
}

pub fn get_post(conn: &Connection, board: &str, num: i64) -> Result<Option<Post>> {
    conn.prepare_cached(queries::SELECT_POST)?
        .query_row(params![board, num], |row| Post::from_row(row, 0))
        .optional()
}

pub fn parent_of(conn: &Connection, board: &str, num: i64) -> Result<Option<i64>> {
    conn.prepare_cached(queries::SELECT_PARENT)?
        .query_row(params![board, num], |row| row.get(0))
        .optional()
}

/// Root first, then replies in posting order.
pub fn thread_posts(conn: &Connection, board: &str, thread: i64) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare_cached(queries::SELECT_THREAD)?;
    let rows = stmt.query_map(params![board, thread], |row| Post::from_row(row, 0))?;
    rows.collect()
}

/// Thread roots in display order: stickies first, then by last activity.
pub fn thread_roots(conn: &Connection, board: &str) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare_cached(queries::SELECT_THREAD_ROOTS)?;
    let rows = stmt.query_map(params![board], |row| Post::from_row(row, 0))?;
    rows.collect()
}

pub fn posts_by_ip(conn: &Connection, board: &str, ip: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(queries::SELECT_POSTS_BY_IP)?;
    let rows = stmt.query_map(params![board, ip], |row| row.get(0))?;
    rows.collect()
}

fn count(conn: &Connection, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<i64> {
    conn.prepare_cached(sql)?.query_row(values, |row| row.get(0))
}

pub fn count_recent_posts(conn: &Connection, board: &str, ip: &str, since: i64) -> Result<i64> {
    count(conn, queries::COUNT_RECENT_BY_IP, params![board, ip, since])
}

pub fn count_repeats(conn: &Connection, board: &str, ip: &str, comment: &str, since: i64) -> Result<i64> {
    count(conn, queries::COUNT_REPEATS, params![board, ip, comment, since])
}

pub fn count_recent_reports(conn: &Connection, reporter: &str, since: i64) -> Result<i64> {
    count(conn, queries::COUNT_RECENT_REPORTS, params![reporter, since])
}

/// Looks for an earlier post with the same file hash. `thread` narrows the
/// search to one thread (root and replies).
pub fn find_md5(conn: &Connection, board: &str, md5: &str, thread: Option<i64>) -> Result<Option<(i64, i64)>> {
    let map = |row: &rusqlite::Row| Ok((row.get(0)?, row.get(1)?));
    match thread {
        Some(thread) => conn
            .prepare_cached(queries::FIND_MD5_THREAD)?
            .query_row(params![board, md5, thread], map)
            .optional(),
        None => conn
            .prepare_cached(queries::FIND_MD5_BOARD)?
            .query_row(params![board, md5], map)
            .optional(),
    }
}

pub fn image_in_use(conn: &Connection, board: &str, path: &str) -> Result<bool> {
    conn.prepare_cached(queries::IMAGE_IN_USE)?
        .exists(params![board, path])
}

pub fn bump_thread(conn: &Connection, board: &str, thread: i64, lasthit: i64) -> Result<()> {
    conn.prepare_cached(queries::BUMP_THREAD)?
        .execute(params![board, thread, lasthit])?;
    Ok(())
}

/// Replies that count against the bump limit: everything except the
/// original poster's own replies inside the grace window.
pub fn sage_count(conn: &Connection, board: &str, root: &Post, nosage_window: i64) -> Result<i64> {
    count(
        conn,
        queries::SAGE_COUNT,
        params![board, root.num, root.timestamp + nosage_window, root.ip],
    )
}

pub fn set_locked(conn: &Connection, board: &str, thread: i64, locked: bool) -> Result<usize> {
    conn.prepare_cached(queries::SET_LOCKED)?
        .execute(params![board, thread, locked])
}

pub fn set_stickied(conn: &Connection, board: &str, thread: i64, stickied: bool) -> Result<usize> {
    conn.prepare_cached(queries::SET_STICKIED)?
        .execute(params![board, thread, stickied])
}

/// Writes back the editable columns of `post`.
pub fn update_post(conn: &Connection, board: &str, post: &Post) -> Result<()> {
    let file = post.file.as_ref();
    let thumb = file.and_then(|f| f.thumbnail.as_ref());
    conn.prepare_cached(queries::UPDATE_POST)?.execute(params![
        board,
        post.num,
        post.name,
        post.trip,
        post.email,
        post.subject,
        post.comment,
        file.map(|f| &f.path),
        file.map_or(0, |f| f.size),
        file.and_then(|f| f.md5.as_ref()),
        file.map_or(0, |f| f.width),
        file.map_or(0, |f| f.height),
        thumb.map(|t| &t.path),
        thumb.map_or(0, |t| t.width),
        thumb.map_or(0, |t| t.height),
        post.lastedit,
        post.lastedit_ip,
    ])?;
    Ok(())
}

pub fn clear_file(conn: &Connection, board: &str, num: i64) -> Result<()> {
    conn.prepare_cached(queries::CLEAR_FILE)?
        .execute(params![board, num])?;
    Ok(())
}

pub fn delete_post(conn: &Connection, board: &str, num: i64) -> Result<()> {
    conn.prepare_cached(queries::DELETE_POST)?
        .execute(params![board, num])?;
    Ok(())
}

pub fn totals(conn: &Connection, board: &str) -> Result<BoardTotals> {
    Ok(BoardTotals {
        threads: count(conn, queries::COUNT_THREADS, params![board])?,
        posts: count(conn, queries::COUNT_POSTS, params![board])?,
        bytes: count(conn, queries::SUM_FILE_SIZES, params![board])?,
    })
}

/// The first non-sticky thread to go when the board is over its limits,
/// with the root's creation time.
pub fn trim_candidate(conn: &Connection, board: &str, method: TrimMethod) -> Result<Option<(i64, i64)>> {
    let sql = match method {
        TrimMethod::Oldest => queries::OLDEST_THREAD_BY_NUM,
        TrimMethod::LeastActive => queries::OLDEST_THREAD_BY_LASTHIT,
    };
    conn.prepare_cached(sql)?
        .query_row(params![board], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
}

pub fn insert_backup(conn: &Connection, board: &str, post: &Post, archived_at: i64) -> Result<()> {
    insert_with(conn, queries::INSERT_BACKUP, board, post, Some(archived_at))
}

pub fn get_backup(conn: &Connection, id: i64) -> Result<Option<Backup>> {
    conn.prepare_cached(queries::SELECT_BACKUP)?
        .query_row(params![id], Backup::from_row)
        .optional()
}

pub fn backup_replies(conn: &Connection, board: &str, thread: i64) -> Result<Vec<Backup>> {
    let mut stmt = conn.prepare_cached(queries::SELECT_BACKUP_REPLIES)?;
    let rows = stmt.query_map(params![board, thread], Backup::from_row)?;
    rows.collect()
}

pub fn expired_backups(conn: &Connection, before: i64) -> Result<Vec<Backup>> {
    let mut stmt = conn.prepare_cached(queries::SELECT_EXPIRED_BACKUPS)?;
    let rows = stmt.query_map(params![before], Backup::from_row)?;
    rows.collect()
}

pub fn delete_backup(conn: &Connection, id: i64) -> Result<()> {
    conn.prepare_cached(queries::DELETE_BACKUP)?
        .execute(params![id])?;
    Ok(())
}

pub fn insert_report(conn: &Connection, board: &str, report: &Report) -> Result<()> {
    conn.prepare_cached(queries::INSERT_REPORT)?.execute(params![
        board,
        report.reporter,
        report.offender,
        report.postnum,
        report.comment,
        report.timestamp,
        report.date,
    ])?;
    Ok(())
}
