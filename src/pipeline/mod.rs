//! Post ingestion: the mutations a submitter can perform on a board.
//!
//! Every operation follows the same shape. Cheap validation runs first,
//! then anything that touches the filesystem, then a single transaction,
//! then page regeneration. Files written before the commit are owned by an
//! [`upload::UploadGuard`] and vanish if anything after them fails.

use rusqlite::Connection;

use crate::{
    archive::{self, DeleteOptions},
    board::Board,
    cache::{self, thread::build_thread_cache},
    config::Config,
    context::{RequestContext, RequestMethod},
    database::{
        models::{Post, PostPatch, Report},
        store,
    },
    error::{PostError, Result},
    format::{clean_string, format_comment, make_date, plain_comment},
    tripcode,
};

use self::{
    flood::{flood_check, FloodAction},
    thread_state::{bump_for_reply, is_sage},
    upload::{process_file, ProcessedFile, Upload},
};

pub mod flood;
pub mod thread_state;
pub mod upload;

#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Thread to reply to; 0 starts a new thread.
    pub parent: i64,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub comment: String,
    pub password: String,
    /// Explicitly posting a thread without a file.
    pub nofile: bool,
    pub file: Option<Upload>,
    /// Staff only: keep the comment as raw HTML.
    pub no_format: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub num: i64,
    pub password: String,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub comment: String,
    /// Replaces the current file when present.
    pub file: Option<Upload>,
    pub no_format: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub posts: Vec<i64>,
    pub password: String,
    pub file_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub posts: Vec<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub num: i64,
    pub thread: i64,
    /// Where the submitter should land afterwards.
    pub redirect: String,
}

/// Normalised user-facing fields, ready to store.
struct Fields {
    name: String,
    trip: String,
    email: String,
    subject: String,
    comment: String,
}

/// One board plus the store it lives in, borrowed for a single request.
pub struct BoardContext<'a> {
    pub conn: &'a mut Connection,
    pub site: &'a Config,
    pub board: &'a Board,
}

fn has_data(file: &Option<Upload>) -> bool {
    file.as_ref().map_or(false, |f| !f.data.is_empty())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<'a> BoardContext<'a> {
    pub fn new(conn: &'a mut Connection, site: &'a Config, board: &'a Board) -> Self {
        Self { conn, site, board }
    }

    fn check_allowed(&self, reply: bool, file: bool) -> Result<()> {
        let cfg = &self.board.cfg;
        let allowed = match (reply, file) {
            (true, true) => cfg.allow_image_replies,
            (true, false) => cfg.allow_text_replies,
            (false, true) => cfg.allow_images,
            (false, false) => cfg.allow_textonly,
        };
        if allowed {
            Ok(())
        } else {
            Err(PostError::NotAllowed)
        }
    }

    fn check_lengths(&self, name: &str, email: &str, subject: &str, comment: &str) -> Result<()> {
        let cfg = &self.board.cfg;
        let field_max = cfg.max_field_length;
        if name.len() > field_max
            || email.len() > field_max
            || subject.len() > field_max
            || comment.len() > cfg.max_comment_length
        {
            return Err(PostError::TooLong);
        }
        Ok(())
    }

    fn normalize(&self, ctx: &RequestContext, name: &str, email: &str, subject: &str, comment: &str, raw: bool) -> Fields {
        let cfg = &self.board.cfg;
        let mut email = clean_string(email);
        let (name, trip) = if cfg.forced_anon {
            if !is_sage(&email) {
                email.clear();
            }
            (String::new(), String::new())
        } else {
            tripcode::process_tripcode(name, cfg.tripkey, &self.site.secret)
        };

        let comment = if comment.trim().is_empty() {
            String::new()
        } else if raw && ctx.is_elevated() {
            comment.to_string()
        } else if cfg.enable_formatting {
            let conn: &Connection = &*self.conn;
            let board = self.board;
            format_comment(comment, |num| {
                store::parent_of(conn, &board.name, num)
                    .ok()
                    .flatten()
                    .map(|parent| board.reply_link(num, parent))
            })
        } else {
            plain_comment(comment)
        };

        Fields {
            name,
            trip,
            email,
            subject: clean_string(subject),
            comment,
        }
    }

    /// Regenerates the thread page and every index page.
    pub(crate) fn refresh(&self, thread: i64) -> Result<()> {
        build_thread_cache(&*self.conn, self.board, thread)?;
        cache::build_cache(&*self.conn, self.board)?;
        Ok(())
    }

    /// Creates a thread or a reply.
    pub fn submit(&mut self, ctx: &RequestContext, sub: Submission) -> Result<PostOutcome> {
        if ctx.method != RequestMethod::Post {
            return Err(PostError::UnjustMethod);
        }
        let board = self.board;
        let cfg = &board.cfg;
        let elevated = ctx.is_elevated();
        let numip = ctx.numip();

        let root = match sub.parent {
            0 => None,
            parent => {
                let root = store::get_post(self.conn, &board.name, parent)?.ok_or(PostError::NoThread)?;
                if !root.is_root() {
                    return Err(PostError::NotAThread);
                }
                if root.locked && !elevated {
                    tracing::info!(
                        target: "moderation",
                        "Rejected reply from {} to locked thread /{}/{}",
                        ctx.ip,
                        board.name,
                        parent
                    );
                    return Err(PostError::ThreadLocked);
                }
                Some(root)
            }
        };

        let file = has_data(&sub.file);
        if !elevated {
            self.check_allowed(root.is_some(), file)?;
        }
        if root.is_none() && !file && !sub.nofile {
            return Err(PostError::NoFile);
        }
        self.check_lengths(&sub.name, &sub.email, &sub.subject, &sub.comment)?;

        let mut fields = self.normalize(ctx, &sub.name, &sub.email, &sub.subject, &sub.comment, sub.no_format);
        if fields.comment.is_empty() && !file {
            return Err(PostError::NoText);
        }
        if fields.name.is_empty() && fields.trip.is_empty() {
            fields.name = cfg.anonymous_name.clone();
        }
        if fields.subject.is_empty() {
            fields.subject = cfg.default_subject.clone();
        }
        if fields.comment.is_empty() {
            fields.comment = cfg.default_comment.clone();
        }

        if !elevated {
            let action = FloodAction::Post {
                comment: &fields.comment,
                file,
            };
            flood_check(self.conn, board, &numip, ctx.timestamp, action)?;
        }

        let processed = match &sub.file {
            Some(upload) if file => Some(process_file(self.conn, board, upload, sub.parent, now_ms())?),
            _ => None,
        };
        let (record, guard) = match processed {
            Some(ProcessedFile { record, guard }) => (Some(record), Some(guard)),
            None => (None, None),
        };

        let tx = self.conn.transaction()?;
        let num = store::next_num(&tx, &board.name)?;
        let post = Post {
            num,
            parent: sub.parent,
            timestamp: ctx.timestamp,
            lasthit: root.as_ref().map_or(ctx.timestamp, |r| r.lasthit),
            ip: numip,
            date: make_date(ctx.timestamp),
            name: fields.name,
            trip: fields.trip,
            email: fields.email,
            subject: fields.subject,
            password: sub.password,
            comment: fields.comment,
            file: record,
            lastedit: None,
            lastedit_ip: None,
            admin_post: elevated,
            stickied: root.as_ref().map_or(false, |r| r.stickied),
            locked: root.as_ref().map_or(false, |r| r.locked),
        };
        store::insert_post(&tx, &board.name, &post)?;
        let bumped = match &root {
            Some(root) => bump_for_reply(&tx, board, root, &post.email, ctx.timestamp)?,
            None => true,
        };
        tx.commit()?;
        if let Some(guard) = guard {
            guard.commit();
        }

        let thread = post.thread();
        if root.is_none() {
            archive::trim_board(self.conn, board, self.site.post_backup, ctx.timestamp)?;
        }
        self.refresh(thread)?;

        tracing::info!(
            "New post /{}/{} in thread {} from {}{}",
            board.name,
            num,
            thread,
            ctx.ip,
            if bumped { "" } else { " (no bump)" }
        );
        Ok(PostOutcome {
            num,
            thread,
            redirect: board.reply_link(num, post.parent),
        })
    }

    /// Rewrites the fields of an existing post. Edits never bump.
    pub fn edit(&mut self, ctx: &RequestContext, req: EditRequest) -> Result<PostOutcome> {
        if ctx.method != RequestMethod::Post {
            return Err(PostError::UnjustMethod);
        }
        let board = self.board;
        let elevated = ctx.is_elevated();
        let mut post = store::get_post(self.conn, &board.name, req.num)?.ok_or(PostError::NoRecord)?;
        if !elevated {
            if req.password.is_empty() || req.password != post.password {
                tracing::info!(
                    target: "moderation",
                    "Bad edit password from {} for /{}/{}",
                    ctx.ip,
                    board.name,
                    req.num
                );
                return Err(PostError::BadPassword);
            }
            if post.locked {
                return Err(PostError::ThreadLocked);
            }
        }
        self.check_lengths(&req.name, &req.email, &req.subject, &req.comment)?;

        let replacing = has_data(&req.file);
        let mut fields = self.normalize(ctx, &req.name, &req.email, &req.subject, &req.comment, req.no_format);
        if fields.comment.is_empty() && !replacing && post.file.is_none() {
            return Err(PostError::NoText);
        }
        if fields.name.is_empty() && fields.trip.is_empty() {
            fields.name = board.cfg.anonymous_name.clone();
        }

        let mut processed = None;
        if let Some(upload) = req.file.as_ref().filter(|_| replacing) {
            let had_file = post.file.is_some();
            if had_file {
                let opts = DeleteOptions {
                    file_only: true,
                    ..Default::default()
                };
                archive::delete_post(self.conn, board, post.num, opts, ctx.timestamp)?;
            }
            match process_file(self.conn, board, upload, post.parent, now_ms()) {
                Ok(done) => processed = Some(done),
                Err(e) => {
                    // The old file is already gone, so no page may link it.
                    if had_file {
                        self.refresh(post.thread())?;
                    }
                    return Err(e);
                }
            }
        }
        let (file, guard) = match processed {
            Some(ProcessedFile { record, guard }) => (Some(Some(record)), Some(guard)),
            None => (None, None),
        };

        PostPatch {
            name: fields.name,
            trip: fields.trip,
            email: fields.email,
            subject: fields.subject,
            comment: fields.comment,
            file,
            lastedit: make_date(ctx.timestamp),
            lastedit_ip: ctx.numip(),
        }
        .apply(&mut post);

        let tx = self.conn.transaction()?;
        store::update_post(&tx, &board.name, &post)?;
        tx.commit()?;
        if let Some(guard) = guard {
            guard.commit();
        }

        self.refresh(post.thread())?;
        tracing::info!("Edited /{}/{} ({})", board.name, post.num, ctx.actor());
        Ok(PostOutcome {
            num: post.num,
            thread: post.thread(),
            redirect: board.reply_link(post.num, post.parent),
        })
    }

    /// Deletes posts (or just their files) after checking every password.
    /// Returns how many posts were affected.
    pub fn delete(&mut self, ctx: &RequestContext, req: DeleteRequest) -> Result<usize> {
        if ctx.method != RequestMethod::Post {
            return Err(PostError::UnjustMethod);
        }
        let board = self.board;
        let elevated = ctx.is_elevated();
        if !elevated && req.password.is_empty() {
            return Err(PostError::BadPassword);
        }
        for &num in &req.posts {
            let post = store::get_post(self.conn, &board.name, num)?.ok_or(PostError::NoRecord)?;
            if !elevated && post.password != req.password {
                tracing::info!(
                    target: "moderation",
                    "Bad deletion password from {} for /{}/{}",
                    ctx.ip,
                    board.name,
                    num
                );
                return Err(PostError::BadPassword);
            }
        }

        let opts = DeleteOptions {
            file_only: req.file_only,
            archive: board.cfg.archive_mode,
            backup: self.site.post_backup,
        };
        let mut deleted = 0;
        for &num in &req.posts {
            // gone already if its thread went earlier in the list
            if store::get_post(self.conn, &board.name, num)?.is_none() {
                continue;
            }
            archive::delete_post(self.conn, board, num, opts, ctx.timestamp)?;
            deleted += 1;
        }
        cache::build_cache(self.conn, board)?;
        Ok(deleted)
    }

    /// Files a report against each listed post.
    pub fn report(&mut self, ctx: &RequestContext, req: ReportRequest) -> Result<()> {
        if ctx.method != RequestMethod::Post {
            return Err(PostError::UnjustMethod);
        }
        let board = self.board;
        if req.reason.trim().is_empty() {
            return Err(PostError::NoReason);
        }
        if req.reason.len() > board.cfg.max_comment_length {
            return Err(PostError::TooLong);
        }
        if req.posts.is_empty() {
            return Err(PostError::NoRecord);
        }
        let reporter = ctx.numip();
        flood_check(self.conn, board, &reporter, ctx.timestamp, FloodAction::Report)?;

        let comment = clean_string(req.reason.trim());
        let tx = self.conn.transaction()?;
        for &num in &req.posts {
            let post = store::get_post(&tx, &board.name, num)?.ok_or(PostError::NoRecord)?;
            let report = Report {
                reporter: reporter.clone(),
                offender: post.ip,
                postnum: num,
                comment: comment.clone(),
                timestamp: ctx.timestamp,
                date: make_date(ctx.timestamp),
            };
            store::insert_report(&tx, &board.name, &report)?;
        }
        tx.commit()?;
        tracing::info!(
            target: "moderation",
            "{} reported {} post(s) on /{}/",
            ctx.ip,
            req.posts.len(),
            board.name
        );
        Ok(())
    }
}
