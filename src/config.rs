use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub listen: SocketAddr,
    pub db: Option<String>,
    /// Site-wide secret for secure tripcodes. Empty disables them.
    #[serde(default)]
    pub secret: String,
    pub staff_password: Option<String>,
    #[serde(default = "default_true")]
    pub post_backup: bool,
    /// Seconds a backup is kept before the sweep purges it; 0 keeps forever.
    #[serde(default = "default_backup_expire")]
    pub backup_expire: i64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
    #[serde(default)]
    pub boards: BTreeMap<String, BoardConfig>,
}

fn default_true() -> bool {
    true
}

fn default_backup_expire() -> i64 {
    7 * 24 * 3600
}

fn default_maintenance_interval() -> u64 {
    3600
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = env::var("WAKABOARD_CONFIG");
        let path = env.as_deref().unwrap_or("wakaboard.toml");
        let config_str = fs::read_to_string(path)?;
        Ok(toml::from_str(&config_str)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateScope {
    Thread,
    Board,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMethod {
    Oldest,
    LeastActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookiePath {
    Root,
    Current,
    Parent,
}

/// Static configuration of one board. Loaded and validated once; every
/// pipeline call borrows it read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub title: String,
    /// Board directory; defaults to the board name relative to the working directory.
    pub root: Option<PathBuf>,
    /// Public URL prefix; defaults to `/<name>/`.
    pub url: Option<String>,
    pub img_dir: String,
    pub thumb_dir: String,
    pub res_dir: String,
    pub archive_dir: String,
    pub backup_dir: String,
    pub html_self: String,
    pub page_ext: String,

    pub max_kb: u64,
    /// Thumbnail box.
    pub max_w: u32,
    pub max_h: u32,
    /// Bump limit.
    pub max_res: i64,
    pub max_posts: i64,
    pub max_threads: i64,
    /// Hours.
    pub max_age: i64,
    pub max_megabytes: i64,
    pub max_field_length: usize,
    pub max_comment_length: usize,
    pub max_lines_shown: usize,
    pub approx_line_length: usize,
    pub max_image_width: u32,
    pub max_image_height: u32,
    pub max_image_pixels: u64,
    pub duplicate_detection: DuplicateScope,

    /// Threads per index page.
    pub images_per_page: usize,
    pub replies_per_thread: usize,
    pub replies_per_sticky: usize,
    /// 0 means no cap on image replies.
    pub image_replies_per_thread: usize,
    /// Replies kept on the `_abbr` thread page; 0 disables that page.
    pub posts_in_abbreviated_page: usize,

    pub allow_textonly: bool,
    pub allow_images: bool,
    pub allow_text_replies: bool,
    pub allow_image_replies: bool,
    pub allow_unknown: bool,
    pub munge_unknown: String,
    pub forbidden_extensions: Vec<String>,
    /// Extension -> icon shown instead of a thumbnail.
    pub filetypes: BTreeMap<String, String>,

    /// Flood windows in seconds.
    pub renzoku: i64,
    pub renzoku2: i64,
    pub renzoku3: i64,
    pub report_renzoku: i64,
    pub nosage_window: i64,

    pub thumbnail_small: bool,
    pub thumbnail_quality: u32,
    pub convert_command: String,
    /// Empty disables the file(1) check.
    pub file_command: String,
    pub stupid_thumbnailing: bool,
    pub animated_badge: bool,

    pub archive_mode: bool,
    pub trim_method: TrimMethod,
    pub forced_anon: bool,
    pub tripkey: char,
    pub anonymous_name: String,
    pub default_subject: String,
    pub default_comment: String,
    pub enable_formatting: bool,
    pub cookie_path: CookiePath,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            title: "Wakaboard".into(),
            root: None,
            url: None,
            img_dir: "src".into(),
            thumb_dir: "thumb".into(),
            res_dir: "res".into(),
            archive_dir: "arch".into(),
            backup_dir: "backup".into(),
            html_self: "index.html".into(),
            page_ext: ".html".into(),
            max_kb: 10240,
            max_w: 200,
            max_h: 200,
            max_res: 500,
            max_posts: 0,
            max_threads: 0,
            max_age: 0,
            max_megabytes: 0,
            max_field_length: 100,
            max_comment_length: 8192,
            max_lines_shown: 15,
            approx_line_length: 150,
            max_image_width: 16384,
            max_image_height: 16384,
            max_image_pixels: 50_000_000,
            duplicate_detection: DuplicateScope::Thread,
            images_per_page: 10,
            replies_per_thread: 5,
            replies_per_sticky: 1,
            image_replies_per_thread: 0,
            posts_in_abbreviated_page: 50,
            allow_textonly: false,
            allow_images: true,
            allow_text_replies: true,
            allow_image_replies: true,
            allow_unknown: false,
            munge_unknown: ".unknown".into(),
            forbidden_extensions: [
                "php", "php3", "php4", "phtml", "shtml", "cgi", "pl", "pm", "py", "r", "exe",
                "dll", "scr", "pif", "asp", "cfm", "jsp", "vbs",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            filetypes: BTreeMap::new(),
            renzoku: 5,
            renzoku2: 10,
            renzoku3: 900,
            report_renzoku: 60,
            nosage_window: 1200,
            thumbnail_small: true,
            thumbnail_quality: 70,
            convert_command: "convert".into(),
            file_command: "file".into(),
            stupid_thumbnailing: false,
            animated_badge: true,
            archive_mode: false,
            trim_method: TrimMethod::LeastActive,
            forced_anon: false,
            tripkey: '!',
            anonymous_name: "Anonymous".into(),
            default_subject: String::new(),
            default_comment: String::new(),
            enable_formatting: true,
            cookie_path: CookiePath::Root,
        }
    }
}

impl BoardConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if !is_plain_relative(name) {
            return Err(eyre!("board name {name:?} is not a plain directory name"));
        }
        for (key, dir) in [
            ("img_dir", &self.img_dir),
            ("thumb_dir", &self.thumb_dir),
            ("res_dir", &self.res_dir),
            ("archive_dir", &self.archive_dir),
            ("backup_dir", &self.backup_dir),
            ("html_self", &self.html_self),
        ] {
            if dir.is_empty() || !is_plain_relative(dir) {
                return Err(eyre!("board {name}: {key} must stay inside the board root"));
            }
        }
        if self.images_per_page == 0 {
            return Err(eyre!("board {name}: images_per_page must be positive"));
        }
        if self.approx_line_length == 0 {
            return Err(eyre!("board {name}: approx_line_length must be positive"));
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            return Err(eyre!("board {name}: thumbnail_quality must be within 1..=100"));
        }
        if self.max_w == 0 || self.max_h == 0 {
            return Err(eyre!("board {name}: thumbnail box must be non-empty"));
        }
        if self.tripkey.is_whitespace() || self.tripkey == '&' {
            return Err(eyre!("board {name}: tripkey {:?} is unusable", self.tripkey));
        }
        Ok(())
    }
}

fn is_plain_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
