use std::{sync::Arc, time::Instant};

use rusqlite::Connection;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::{
    archive,
    board::Site,
    context::RequestContext,
    error::{PostError, Result},
    moderation::StaffAction,
    pipeline::{BoardContext, DeleteRequest, EditRequest, PostOutcome, ReportRequest, Submission},
};

pub mod models;
mod queries;
pub mod store;

/// The connection plus everything loaded at start-up. Owned by exactly one
/// thread, so mutations never interleave.
pub struct Engine {
    pub conn: Connection,
    pub site: Arc<Site>,
}

impl Engine {
    pub fn open(site: Arc<Site>) -> rusqlite::Result<Self> {
        let path = site.cfg.db.as_deref().unwrap_or("wakaboard.db3");
        let conn = store::open(path)?;
        tracing::info!("Database connected ({})", path);
        Ok(Self { conn, site })
    }

    pub fn with_board<T>(&mut self, name: &str, f: impl FnOnce(&mut BoardContext) -> Result<T>) -> Result<T> {
        let board = self.site.board(name).ok_or(PostError::UnknownBoard)?;
        let mut ctx = BoardContext::new(&mut self.conn, &self.site.cfg, board);
        f(&mut ctx)
    }

    pub fn purge_backups(&mut self, now: i64) -> Result<usize> {
        archive::purge_backups(&self.conn, &self.site, now)
    }
}

macro_rules! generate_executor {
    ($($task:ident / $fn:ident, ($db:ident, $($arg:ident: $ty:ty),*) => $ret:ty $handler:block)*) => {
        #[derive(Clone)]
        pub struct ExecutorConnection(UnboundedSender<Task>);

        enum Task {
            $($task{tx:oneshot::Sender<$ret>,$($arg:$ty,)*}),*
        }

        impl Task {
            fn name(&self) -> &'static str {
                match self {
                    $(Task::$task{..} => stringify!($task),)*
                }
            }
        }

        impl ExecutorConnection {
            $(pub async fn $fn(&self, $($arg: $ty),*) -> $ret {
                let (tx, rx) = oneshot::channel();
                self.0
                    .send(Task::$task{tx,$($arg),*})
                    .map_err(|_| PostError::Internal("database executor has stopped".into()))?;
                rx.await
                    .map_err(|_| PostError::Internal("database executor dropped the task".into()))?
            })*
        }

        pub struct DbExecutor {
            rx: UnboundedReceiver<Task>,
            engine: Engine,
        }

        impl DbExecutor {
            pub fn create(site: Arc<Site>) -> rusqlite::Result<(Self, ExecutorConnection)> {
                let (tx, rx) = unbounded_channel();
                let engine = Engine::open(site)?;
                Ok((Self { rx, engine }, ExecutorConnection(tx)))
            }

            pub fn run(mut self) {
                while let Some(task) = self.rx.blocking_recv() {
                    let before = Instant::now();
                    let name = task.name();
                    tracing::debug!("received task {name}");
                    match task {
                        $(Task::$task{tx,$($arg),*} => {
                            let $db = &mut self.engine;
                            let _e = tx.send((||$handler)());
                        })*
                    }
                    tracing::debug!("task {name} took {:.2}ms", before.elapsed().as_secs_f64() * 1000.0);
                }
                tracing::info!("Database executor stopped");
            }
        }
    };
}

generate_executor! {
    SubmitPost / submit_post, (db, board: String, ctx: RequestContext, sub: Submission) => Result<PostOutcome> {
        db.with_board(&board, |bc| bc.submit(&ctx, sub))
    }
    EditPost / edit_post, (db, board: String, ctx: RequestContext, req: EditRequest) => Result<PostOutcome> {
        db.with_board(&board, |bc| bc.edit(&ctx, req))
    }
    DeletePosts / delete_posts, (db, board: String, ctx: RequestContext, req: DeleteRequest) => Result<usize> {
        db.with_board(&board, |bc| bc.delete(&ctx, req))
    }
    ReportPosts / report_posts, (db, board: String, ctx: RequestContext, req: ReportRequest) => Result<()> {
        db.with_board(&board, |bc| bc.report(&ctx, req))
    }
    Moderate / moderate, (db, board: String, ctx: RequestContext, action: StaffAction) => Result<()> {
        db.with_board(&board, |bc| bc.moderate(&ctx, action))
    }
    PurgeBackups / purge_backups, (db, now: i64) => Result<usize> {
        db.purge_backups(now)
    }
}
