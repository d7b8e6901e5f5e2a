use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::WrapErr, Result};

use crate::config::{BoardConfig, Config, CookiePath};

/// A validated board: configuration plus resolved paths and URLs.
#[derive(Debug, Clone)]
pub struct Board {
    pub name: String,
    pub cfg: BoardConfig,
    root: PathBuf,
    url: String,
}

impl Board {
    pub fn new(name: &str, cfg: BoardConfig) -> Result<Self> {
        cfg.validate(name)?;
        let root = cfg.root.clone().unwrap_or_else(|| PathBuf::from(name));
        let mut url = cfg.url.clone().unwrap_or_else(|| format!("/{name}/"));
        if !url.ends_with('/') {
            url.push('/');
        }
        Ok(Self {
            name: name.to_string(),
            cfg,
            root,
            url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolves a board-relative path such as `src/123.jpg`.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn archive_path(&self, rel: &str) -> PathBuf {
        self.root.join(&self.cfg.archive_dir).join(rel)
    }

    pub fn backup_path(&self, rel: &str) -> PathBuf {
        self.root
            .join(&self.cfg.archive_dir)
            .join(&self.cfg.backup_dir)
            .join(rel)
    }

    pub fn image_rel(&self, filename: &str) -> String {
        format!("{}/{}", self.cfg.img_dir, filename)
    }

    pub fn thumb_rel(&self, filename: &str) -> String {
        format!("{}/{}", self.cfg.thumb_dir, filename)
    }

    /// True when a stored thumbnail path points into this board's thumbnail
    /// directory (as opposed to a shared icon or the source image itself).
    pub fn owns_thumbnail(&self, rel: &str) -> bool {
        rel.starts_with(&format!("{}/", self.cfg.thumb_dir))
    }

    pub fn page_filename(&self, page: usize) -> String {
        if page == 0 {
            self.cfg.html_self.clone()
        } else {
            format!("{}{}", page, self.cfg.page_ext)
        }
    }

    pub fn page_path(&self, page: usize) -> PathBuf {
        self.root.join(self.page_filename(page))
    }

    pub fn thread_rel(&self, thread: i64) -> String {
        format!("{}/{}{}", self.cfg.res_dir, thread, self.cfg.page_ext)
    }

    pub fn thread_abbr_rel(&self, thread: i64) -> String {
        format!("{}/{}_abbr{}", self.cfg.res_dir, thread, self.cfg.page_ext)
    }

    pub fn expand_url(&self, rel: &str) -> String {
        if rel.starts_with('/') || rel.starts_with("http") {
            rel.to_string()
        } else {
            format!("{}{}", self.url, rel)
        }
    }

    pub fn reply_link(&self, num: i64, parent: i64) -> String {
        if parent == 0 {
            self.expand_url(&self.thread_rel(num))
        } else {
            format!("{}#{}", self.expand_url(&self.thread_rel(parent)), num)
        }
    }

    pub fn cookie_path(&self) -> String {
        match self.cfg.cookie_path {
            CookiePath::Root => "/".into(),
            CookiePath::Current => self.url.clone(),
            CookiePath::Parent => {
                let trimmed = self.url.trim_end_matches('/');
                match trimmed.rfind('/') {
                    Some(i) => trimmed[..=i].to_string(),
                    None => "/".into(),
                }
            }
        }
    }

    /// Creates the directory tree the pipeline writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        let cfg = &self.cfg;
        for dir in [&cfg.img_dir, &cfg.thumb_dir, &cfg.res_dir] {
            std::fs::create_dir_all(self.root.join(dir))?;
            std::fs::create_dir_all(self.archive_path(dir))?;
            std::fs::create_dir_all(self.backup_path(dir))?;
        }
        Ok(())
    }
}

/// Everything loaded at start-up: site settings and the boards.
#[derive(Debug)]
pub struct Site {
    pub cfg: Config,
    pub boards: BTreeMap<String, Board>,
}

impl Site {
    pub fn new(mut cfg: Config) -> Result<Self> {
        let mut boards = BTreeMap::new();
        for (name, board_cfg) in std::mem::take(&mut cfg.boards) {
            let board = Board::new(&name, board_cfg)?;
            board
                .ensure_dirs()
                .wrap_err_with(|| format!("Failed to create directories for /{name}/"))?;
            boards.insert(name, board);
        }
        tracing::info!("Loaded {} board(s)", boards.len());
        Ok(Self { cfg, boards })
    }

    pub fn board(&self, name: &str) -> Option<&Board> {
        self.boards.get(name)
    }
}
