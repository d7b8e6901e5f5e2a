//! Staff actions. Each one needs an elevated request context.

use std::net::IpAddr;

use crate::{
    archive::{self, DeleteOptions},
    cache,
    context::{ip_to_dec, RequestContext},
    database::store,
    error::{PostError, Result},
    pipeline::{
        thread_state::{set_flag, ThreadFlag},
        BoardContext,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffAction {
    Lock { thread: i64 },
    Unlock { thread: i64 },
    Sticky { thread: i64 },
    Unsticky { thread: i64 },
    Delete { posts: Vec<i64>, file_only: bool, archive: bool },
    DeleteByIp { ip: IpAddr },
    RestoreBackup { id: i64 },
    RemoveBackup { id: i64 },
    Rebuild,
}

impl BoardContext<'_> {
    /// Runs one staff action and regenerates whatever pages it touched.
    pub fn moderate(&mut self, ctx: &RequestContext, action: StaffAction) -> Result<()> {
        let board = self.board;
        if !ctx.is_elevated() {
            tracing::warn!(
                target: "moderation",
                "Unauthorised {:?} on /{}/ from {}",
                action,
                board.name,
                ctx.ip
            );
            return Err(PostError::NotElevated);
        }
        tracing::info!(target: "moderation", "{} on /{}/: {:?}", ctx.actor(), board.name, action);

        match action {
            StaffAction::Lock { thread } => self.toggle(thread, ThreadFlag::Locked, true),
            StaffAction::Unlock { thread } => self.toggle(thread, ThreadFlag::Locked, false),
            StaffAction::Sticky { thread } => self.toggle(thread, ThreadFlag::Stickied, true),
            StaffAction::Unsticky { thread } => self.toggle(thread, ThreadFlag::Stickied, false),
            StaffAction::Delete {
                posts,
                file_only,
                archive,
            } => {
                for &num in &posts {
                    store::get_post(self.conn, &board.name, num)?.ok_or(PostError::NoRecord)?;
                }
                let opts = DeleteOptions {
                    file_only,
                    archive: archive && !file_only,
                    backup: self.site.post_backup,
                };
                self.delete_all(&posts, opts, ctx.timestamp)
            }
            StaffAction::DeleteByIp { ip } => {
                let posts = store::posts_by_ip(self.conn, &board.name, &ip_to_dec(ip))?;
                let opts = DeleteOptions {
                    backup: self.site.post_backup,
                    ..Default::default()
                };
                self.delete_all(&posts, opts, ctx.timestamp)
            }
            StaffAction::RestoreBackup { id } => {
                let thread = archive::restore_backup(self.conn, board, id)?;
                self.refresh(thread)
            }
            StaffAction::RemoveBackup { id } => archive::remove_backup(self.conn, board, id),
            StaffAction::Rebuild => cache::rebuild_board(self.conn, board),
        }
    }

    fn toggle(&mut self, thread: i64, flag: ThreadFlag, value: bool) -> Result<()> {
        set_flag(self.conn, self.board, thread, flag, value)?;
        self.refresh(thread)
    }

    fn delete_all(&mut self, posts: &[i64], opts: DeleteOptions, now: i64) -> Result<()> {
        let board = self.board;
        for &num in posts {
            if store::get_post(self.conn, &board.name, num)?.is_none() {
                continue;
            }
            archive::delete_post(self.conn, board, num, opts, now)?;
        }
        cache::build_cache(self.conn, board)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::Board,
        config::{BoardConfig, Config},
        database::store::tests::post,
        pipeline::upload::tests::test_board,
    };
    use rusqlite::Connection;
    use std::{fs, net::Ipv4Addr};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Board, Config, Connection) {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let site = toml::from_str("log_level = \"info\"\nlisten = \"127.0.0.1:0\"\n").unwrap();
        let conn = store::open_in_memory().unwrap();
        store::insert_post(&conn, "b", &post(1, 0, 100)).unwrap();
        store::insert_post(&conn, "b", &post(2, 1, 200)).unwrap();
        let mut other = post(3, 0, 300);
        other.ip = "1".into();
        store::insert_post(&conn, "b", &other).unwrap();
        (dir, board, site, conn)
    }

    fn staff() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1000).staff("mod")
    }

    #[test]
    fn anonymous_requests_are_refused() {
        let (_dir, board, site, mut conn) = setup();
        let anon = RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1000);
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        assert!(matches!(
            bc.moderate(&anon, StaffAction::Lock { thread: 1 }),
            Err(PostError::NotElevated)
        ));
    }

    #[test]
    fn lock_and_sticky_reach_the_pages() {
        let (_dir, board, site, mut conn) = setup();
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        bc.moderate(&staff(), StaffAction::Lock { thread: 1 }).unwrap();
        bc.moderate(&staff(), StaffAction::Sticky { thread: 1 }).unwrap();
        assert!(matches!(
            bc.moderate(&staff(), StaffAction::Lock { thread: 2 }),
            Err(PostError::NotAThread)
        ));
        let reply = store::get_post(&conn, "b", 2).unwrap().unwrap();
        assert!(reply.locked && reply.stickied);
        let page = fs::read_to_string(board.path("res/1.html")).unwrap();
        assert!(page.contains("[Locked]"));
        assert!(page.contains("[Sticky]"));
    }

    #[test]
    fn delete_by_ip_spares_other_addresses() {
        let (_dir, board, site, mut conn) = setup();
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        bc.moderate(&staff(), StaffAction::DeleteByIp { ip: IpAddr::V4(Ipv4Addr::LOCALHOST) })
            .unwrap();
        let left: Vec<i64> = store::thread_roots(&conn, "b").unwrap().iter().map(|p| p.num).collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn deleted_threads_come_back_from_backup() {
        let (_dir, board, site, mut conn) = setup();
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        let delete = StaffAction::Delete {
            posts: vec![1],
            file_only: false,
            archive: false,
        };
        bc.moderate(&staff(), delete).unwrap();
        assert!(!board.path("res/1.html").exists());
        let id = store::expired_backups(bc.conn, i64::MAX)
            .unwrap()
            .into_iter()
            .find(|b| b.post.num == 1)
            .unwrap()
            .id;
        bc.moderate(&staff(), StaffAction::RestoreBackup { id }).unwrap();
        assert_eq!(store::thread_posts(&conn, "b", 1).unwrap().len(), 2);
        assert!(board.path("res/1.html").exists());
    }

    #[test]
    fn deleting_unknown_posts_fails_up_front() {
        let (_dir, board, site, mut conn) = setup();
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        let delete = StaffAction::Delete {
            posts: vec![3, 42],
            file_only: false,
            archive: false,
        };
        assert!(matches!(bc.moderate(&staff(), delete), Err(PostError::NoRecord)));
        assert!(store::get_post(&conn, "b", 3).unwrap().is_some());
    }

    #[test]
    fn rebuild_restores_missing_pages() {
        let (_dir, board, site, mut conn) = setup();
        let mut bc = BoardContext::new(&mut conn, &site, &board);
        bc.moderate(&staff(), StaffAction::Rebuild).unwrap();
        fs::remove_file(board.path("res/3.html")).unwrap();
        bc.moderate(&staff(), StaffAction::Rebuild).unwrap();
        assert!(board.path("res/3.html").exists());
        assert!(board.page_path(0).exists());
    }
}
