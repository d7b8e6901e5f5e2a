//! Lock/sticky flags and bumping.

use rusqlite::Connection;

use crate::{
    board::Board,
    database::{models::Post, store},
    error::{PostError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFlag {
    Locked,
    Stickied,
}

/// Sets a flag on every post of a thread. Only thread roots qualify.
pub fn set_flag(conn: &Connection, board: &Board, thread: i64, flag: ThreadFlag, value: bool) -> Result<()> {
    let root = store::get_post(conn, &board.name, thread)?.ok_or(PostError::NoThread)?;
    if !root.is_root() {
        return Err(PostError::NotAThread);
    }
    match flag {
        ThreadFlag::Locked => store::set_locked(conn, &board.name, thread, value)?,
        ThreadFlag::Stickied => store::set_stickied(conn, &board.name, thread, value)?,
    };
    Ok(())
}

pub fn is_sage(email: &str) -> bool {
    email.trim().eq_ignore_ascii_case("sage")
}

/// Applies bump rules for a reply that has just been inserted. Returns
/// whether the thread was bumped.
pub fn bump_for_reply(conn: &Connection, board: &Board, root: &Post, email: &str, now: i64) -> Result<bool> {
    if is_sage(email) {
        return Ok(false);
    }
    let replies = store::sage_count(conn, &board.name, root, board.cfg.nosage_window)?;
    if replies > board.cfg.max_res {
        return Ok(false);
    }
    store::bump_thread(conn, &board.name, root.num, now)?;
    Ok(true)
}
