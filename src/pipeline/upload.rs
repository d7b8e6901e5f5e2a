//! Saving, checking and thumbnailing an uploaded file.

use std::{
    fs::{self, OpenOptions},
    io::{Cursor, Write},
    path::PathBuf,
};

use md5::{Digest, Md5};
use rand::Rng;
use rusqlite::Connection;

use crate::{
    board::Board,
    config::DuplicateScope,
    database::{
        models::{FileRecord, Thumbnail},
        store,
    },
    error::{PostError, Result},
    imghdr::{self, FileInfo},
    thumbnail::{self, ThumbnailRequest, BADGE_HEIGHT},
};

#[derive(Debug, Clone)]
pub struct Upload {
    /// Name as sent by the client, possibly with a directory part.
    pub filename: String,
    pub data: Vec<u8>,
}

/// Deletes every file it tracks when dropped, unless committed.
#[derive(Debug, Default)]
pub struct UploadGuard {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl UploadGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {e}", path.display());
            }
        }
    }
}

pub struct ProcessedFile {
    pub record: FileRecord,
    pub guard: UploadGuard,
}

fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// Keeps only `[A-Za-z0-9._-]` so the name is safe in paths and markup.
fn safe_name(filename: &str) -> String {
    base_name(filename)
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

fn stored_name(board: &Board, info: &FileInfo, known: bool, upload: &Upload, now_ms: i64) -> Result<String> {
    if !info.is_image() && board.cfg.filetypes.contains_key(&info.ext) {
        let name = safe_name(&upload.filename);
        if name.is_empty() || name.starts_with('.') {
            return Err(PostError::BadFormat);
        }
        return Ok(name);
    }
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    let mut name = format!("{now_ms}{suffix:03}");
    if !info.ext.is_empty() {
        name.push('.');
        name.push_str(&info.ext);
    }
    if !known {
        name.push_str(&board.cfg.munge_unknown);
    }
    Ok(name)
}

fn icon_for(board: &Board, ext: &str) -> Option<Thumbnail> {
    let icon = board.cfg.filetypes.get(ext)?;
    let (width, height) = fs::File::open(board.path(icon.trim_start_matches('/')))
        .ok()
        .and_then(|mut f| imghdr::analyze(&mut f, icon).ok())
        .map_or((0, 0), |info| (info.width, info.height));
    Some(Thumbnail {
        path: icon.clone(),
        width,
        height,
    })
}

/// Validates and stores `upload` for a post in `thread` (0 for a new thread).
/// Files written here are removed again if anything later fails and the
/// returned guard is not committed.
pub fn process_file(conn: &Connection, board: &Board, upload: &Upload, thread: i64, now_ms: i64) -> Result<ProcessedFile> {
    let cfg = &board.cfg;
    if upload.data.len() as u64 > cfg.max_kb * 1024 {
        return Err(PostError::TooBig);
    }

    let info = imghdr::analyze(&mut Cursor::new(&upload.data), &upload.filename)?;
    let known = info.is_image() || cfg.filetypes.contains_key(&info.ext);
    if cfg.forbidden_extensions.iter().any(|e| e.eq_ignore_ascii_case(&info.ext)) {
        return Err(PostError::BadFormat);
    }
    if !cfg.allow_unknown && !known {
        return Err(PostError::BadFormat);
    }
    if info.width > cfg.max_image_width
        || info.height > cfg.max_image_height
        || info.width as u64 * info.height as u64 > cfg.max_image_pixels
    {
        return Err(PostError::TooBig);
    }

    let filename = stored_name(board, &info, known, upload, now_ms)?;
    let rel = board.image_rel(&filename);
    let path = board.path(&rel);
    if store::image_in_use(conn, &board.name, &rel)? || path.exists() {
        return Err(PostError::DuplicateName);
    }

    let mut guard = UploadGuard::default();
    let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    guard.track(path.clone());
    file.write_all(&upload.data)?;
    drop(file);

    let md5 = format!("{:x}", Md5::digest(&upload.data));
    let scope = match cfg.duplicate_detection {
        DuplicateScope::Thread => Some(Some(thread)),
        DuplicateScope::Board => Some(None),
        DuplicateScope::Off => None,
    };
    if let Some(scope) = scope {
        if let Some((num, parent)) = store::find_md5(conn, &board.name, &md5, scope)? {
            return Err(PostError::Duplicate {
                link: board.reply_link(num, parent),
            });
        }
    }

    if info.is_image() {
        thumbnail::check_file_type(&cfg.file_command, &path)?;
    }

    let thumbnail = if !info.is_image() {
        icon_for(board, &info.ext)
    } else {
        let (w, h) = (info.width, info.height);
        let (tn_w, tn_h) = if w > cfg.max_w || h > cfg.max_h || cfg.thumbnail_small {
            thumbnail::fit(w, h, cfg.max_w, cfg.max_h)
        } else {
            (w, h)
        };
        if cfg.stupid_thumbnailing || (tn_w, tn_h) == (w, h) {
            Some(Thumbnail {
                path: rel.clone(),
                width: tn_w,
                height: tn_h,
            })
        } else {
            let stem = filename.rsplit_once('.').map_or(filename.as_str(), |(s, _)| s);
            let thumb_rel = board.thumb_rel(&format!("{stem}s.jpg"));
            let thumb_path = board.path(&thumb_rel);
            let animated =
                cfg.animated_badge && info.ext == "gif" && imghdr::is_animated_gif(&upload.data);
            let req = ThumbnailRequest {
                src: &path,
                dst: &thumb_path,
                width: tn_w,
                height: tn_h,
                quality: cfg.thumbnail_quality,
                gif: info.ext == "gif",
                animated,
            };
            if thumbnail::make_thumbnail(&cfg.convert_command, &req) {
                guard.track(thumb_path);
                Some(Thumbnail {
                    path: thumb_rel,
                    width: tn_w,
                    height: if animated { tn_h + BADGE_HEIGHT } else { tn_h },
                })
            } else {
                tracing::warn!("Thumbnailing {rel} failed, posting without a thumbnail");
                None
            }
        }
    };

    Ok(ProcessedFile {
        record: FileRecord {
            path: rel,
            size: upload.data.len() as i64,
            md5: Some(md5),
            width: info.width,
            height: info.height,
            thumbnail,
        },
        guard,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{config::BoardConfig, database::store::tests::post, imghdr::tests::png};
    use tempfile::TempDir;

    /// A board rooted in `dir` that needs no external tools.
    pub fn test_board(dir: &TempDir, cfg: BoardConfig) -> Board {
        let cfg = BoardConfig {
            root: Some(dir.path().to_path_buf()),
            file_command: String::new(),
            thumbnail_small: false,
            ..cfg
        };
        let board = Board::new("b", cfg).unwrap();
        board.ensure_dirs().unwrap();
        board
    }

    fn files_in(board: &Board, dir: &str) -> usize {
        fs::read_dir(board.path(dir)).unwrap().count()
    }

    fn png_upload() -> Upload {
        Upload {
            filename: "C:\\pics\\cat.png".into(),
            data: png(100, 50),
        }
    }

    #[test]
    fn small_image_is_its_own_thumbnail() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        let done = process_file(&conn, &board, &png_upload(), 0, 1_700_000_000_000).unwrap();
        let rec = &done.record;
        assert!(rec.path.starts_with("src/1700000000000"));
        assert!(rec.path.ends_with(".png"));
        assert_eq!((rec.width, rec.height), (100, 50));
        let thumb = rec.thumbnail.as_ref().unwrap();
        assert_eq!(thumb.path, rec.path);
        assert_eq!((thumb.width, thumb.height), (100, 50));
        done.guard.commit();
        assert_eq!(files_in(&board, "src"), 1);
    }

    #[test]
    fn uncommitted_guard_cleans_up() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        let done = process_file(&conn, &board, &png_upload(), 0, 1).unwrap();
        assert_eq!(files_in(&board, "src"), 1);
        drop(done);
        assert_eq!(files_in(&board, "src"), 0);
    }

    #[test]
    fn duplicate_in_thread_is_rejected_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        let first = process_file(&conn, &board, &png_upload(), 0, 1).unwrap();
        let mut root = post(1, 0, 100);
        root.file = Some(first.record.clone());
        store::insert_post(&conn, "b", &root).unwrap();
        first.guard.commit();

        let err = process_file(&conn, &board, &png_upload(), 1, 2).err().unwrap();
        assert!(matches!(err, PostError::Duplicate { ref link } if link == "/b/res/1.html"));
        assert_eq!(files_in(&board, "src"), 1);
        // another thread is fine under thread scope
        assert!(process_file(&conn, &board, &png_upload(), 7, 3).is_ok());
    }

    #[test]
    fn board_scope_and_off() {
        let dir = TempDir::new().unwrap();
        let conn = store::open_in_memory().unwrap();
        let cfg = BoardConfig {
            duplicate_detection: DuplicateScope::Board,
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let first = process_file(&conn, &board, &png_upload(), 0, 1).unwrap();
        let mut reply = post(2, 1, 100);
        reply.file = Some(first.record.clone());
        store::insert_post(&conn, "b", &reply).unwrap();
        first.guard.commit();
        let err = process_file(&conn, &board, &png_upload(), 5, 2).err().unwrap();
        assert!(matches!(err, PostError::Duplicate { ref link } if link == "/b/res/1.html#2"));

        let cfg = BoardConfig {
            duplicate_detection: DuplicateScope::Off,
            ..Default::default()
        };
        let dir2 = TempDir::new().unwrap();
        let board = test_board(&dir2, cfg);
        assert!(process_file(&conn, &board, &png_upload(), 1, 3).is_ok());
    }

    #[test]
    fn rejects_unknown_and_forbidden_types() {
        let dir = TempDir::new().unwrap();
        let board = test_board(&dir, BoardConfig::default());
        let conn = store::open_in_memory().unwrap();
        let zip = Upload {
            filename: "a.zip".into(),
            data: b"PK\x03\x04".to_vec(),
        };
        assert!(matches!(process_file(&conn, &board, &zip, 0, 1), Err(PostError::BadFormat)));
        let php = Upload {
            filename: "shell.php".into(),
            data: b"<?php".to_vec(),
        };
        assert!(matches!(process_file(&conn, &board, &php, 0, 1), Err(PostError::BadFormat)));
        assert_eq!(files_in(&board, "src"), 0);
    }

    #[test]
    fn unknown_files_are_munged_when_allowed() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            allow_unknown: true,
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let zip = Upload {
            filename: "a.zip".into(),
            data: b"PK\x03\x04".to_vec(),
        };
        let done = process_file(&conn, &board, &zip, 0, 1).unwrap();
        assert!(done.record.path.ends_with(".zip.unknown"));
        assert!(done.record.thumbnail.is_none());
    }

    #[test]
    fn filetypes_keep_original_name_and_icon() {
        let dir = TempDir::new().unwrap();
        let mut cfg = BoardConfig::default();
        cfg.filetypes.insert("zip".into(), "/icons/zip.png".into());
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let zip = Upload {
            filename: "/home/u/archive.zip".into(),
            data: b"PK\x03\x04".to_vec(),
        };
        let done = process_file(&conn, &board, &zip, 0, 1).unwrap();
        assert_eq!(done.record.path, "src/archive.zip");
        assert_eq!(done.record.thumbnail.as_ref().unwrap().path, "/icons/zip.png");
        done.guard.commit();
        let again = Upload {
            filename: "archive.zip".into(),
            data: b"PK\x03\x04 other".to_vec(),
        };
        assert!(matches!(
            process_file(&conn, &board, &again, 0, 2),
            Err(PostError::DuplicateName)
        ));
    }

    #[test]
    fn kept_names_are_reduced_to_safe_characters() {
        assert_eq!(safe_name("C:\\dl\\my file (1).zip"), "my_file__1_.zip");
        let dir = TempDir::new().unwrap();
        let mut cfg = BoardConfig::default();
        cfg.filetypes.insert("zip".into(), "/icons/zip.png".into());
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let zip = Upload {
            filename: "x\" onmouseover=\"alert(1).zip".into(),
            data: b"PK\x03\x04".to_vec(),
        };
        let done = process_file(&conn, &board, &zip, 0, 1).unwrap();
        assert_eq!(done.record.path, "src/x__onmouseover__alert_1_.zip");
        assert!(board.path(&done.record.path).exists());
    }

    #[test]
    fn size_and_dimension_limits() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            max_kb: 1,
            max_image_width: 50,
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let big = Upload {
            filename: "big.png".into(),
            data: vec![0; 2048],
        };
        assert!(matches!(process_file(&conn, &board, &big, 0, 1), Err(PostError::TooBig)));
        assert!(matches!(
            process_file(&conn, &board, &png_upload(), 0, 1),
            Err(PostError::TooBig)
        ));
    }

    #[test]
    fn large_image_gets_scaled_thumbnail() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("convert.sh");
        fs::write(&script, "for a; do last=$a; done; echo jpeg > \"$last\"\n").unwrap();
        let cfg = BoardConfig {
            convert_command: format!("sh {}", script.display()),
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let upload = Upload {
            filename: "wide.png".into(),
            data: png(800, 400),
        };
        let done = process_file(&conn, &board, &upload, 0, 42).unwrap();
        let thumb = done.record.thumbnail.clone().unwrap();
        assert!(thumb.path.starts_with("thumb/42"));
        assert!(thumb.path.ends_with("s.jpg"));
        assert_eq!((thumb.width, thumb.height), (200, 100));
        assert_eq!(files_in(&board, "thumb"), 1);
        drop(done);
        assert_eq!(files_in(&board, "thumb"), 0);
    }

    #[test]
    fn failed_thumbnail_still_posts() {
        let dir = TempDir::new().unwrap();
        let cfg = BoardConfig {
            convert_command: "/nonexistent/convert".into(),
            ..Default::default()
        };
        let board = test_board(&dir, cfg);
        let conn = store::open_in_memory().unwrap();
        let upload = Upload {
            filename: "wide.png".into(),
            data: png(800, 400),
        };
        let done = process_file(&conn, &board, &upload, 0, 1).unwrap();
        assert!(done.record.thumbnail.is_none());
    }
}
