use rusqlite::Connection;

use crate::{
    board::Board,
    database::store,
    error::{FloodKind, PostError, Result},
};

/// What the submitter is doing; each action has its own window.
#[derive(Debug, Clone, Copy)]
pub enum FloodAction<'a> {
    /// `comment` is the normalised text compared by the repeat check.
    Post { comment: &'a str, file: bool },
    Report,
}

pub fn flood_check(conn: &Connection, board: &Board, ip: &str, now: i64, action: FloodAction) -> Result<()> {
    let cfg = &board.cfg;
    match action {
        FloodAction::Post { file: true, .. } => {
            if store::count_recent_posts(conn, &board.name, ip, now - cfg.renzoku2)? > 0 {
                return Err(PostError::Flood(FloodKind::File));
            }
        }
        FloodAction::Post { comment, file: false } => {
            if store::count_recent_posts(conn, &board.name, ip, now - cfg.renzoku)? > 0 {
                return Err(PostError::Flood(FloodKind::Post));
            }
            if cfg.renzoku3 != 0
                && store::count_repeats(conn, &board.name, ip, comment, now - cfg.renzoku3)? > 0
            {
                return Err(PostError::Flood(FloodKind::Repeat));
            }
        }
        FloodAction::Report => {
            if store::count_recent_reports(conn, ip, now - cfg.report_renzoku)? > 0 {
                return Err(PostError::Flood(FloodKind::Report));
            }
        }
    }
    Ok(())
}
