use rusqlite::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Board-relative path, or an icon URL for non-image files.
    pub path: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Board-relative path such as `src/1700000000000123.png`.
    pub path: String,
    pub size: i64,
    pub md5: Option<String>,
    pub width: u32,
    pub height: u32,
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Post {
    pub num: i64,
    /// 0 for thread roots.
    pub parent: i64,
    pub timestamp: i64,
    pub lasthit: i64,
    pub ip: String,
    pub date: String,
    pub name: String,
    pub trip: String,
    pub email: String,
    pub subject: String,
    pub password: String,
    pub comment: String,
    pub file: Option<FileRecord>,
    pub lastedit: Option<String>,
    pub lastedit_ip: Option<String>,
    pub admin_post: bool,
    pub stickied: bool,
    pub locked: bool,
}

impl Post {
    pub fn is_root(&self) -> bool {
        self.parent == 0
    }

    /// The thread this post belongs to.
    pub fn thread(&self) -> i64 {
        if self.parent == 0 {
            self.num
        } else {
            self.parent
        }
    }

    pub fn has_image(&self) -> bool {
        self.file.as_ref().map_or(false, |f| f.width > 0)
    }

    /// Reads the standard post column list starting at `offset`.
    pub(super) fn from_row(row: &Row, offset: usize) -> rusqlite::Result<Self> {
        let col = |i: usize| offset + i;
        let image: Option<String> = row.get(col(12))?;
        let thumbnail: Option<String> = row.get(col(17))?;
        let file = match image {
            Some(path) => Some(FileRecord {
                path,
                size: row.get(col(13))?,
                md5: row.get(col(14))?,
                width: row.get(col(15))?,
                height: row.get(col(16))?,
                thumbnail: match thumbnail {
                    Some(path) => Some(Thumbnail {
                        path,
                        width: row.get(col(18))?,
                        height: row.get(col(19))?,
                    }),
                    None => None,
                },
            }),
            None => None,
        };
        Ok(Self {
            num: row.get(col(0))?,
            parent: row.get(col(1))?,
            timestamp: row.get(col(2))?,
            lasthit: row.get(col(3))?,
            ip: row.get(col(4))?,
            date: row.get(col(5))?,
            name: row.get(col(6))?,
            trip: row.get(col(7))?,
            email: row.get(col(8))?,
            subject: row.get(col(9))?,
            password: row.get(col(10))?,
            comment: row.get(col(11))?,
            file,
            lastedit: row.get(col(20))?,
            lastedit_ip: row.get(col(21))?,
            admin_post: row.get(col(22))?,
            stickied: row.get(col(23))?,
            locked: row.get(col(24))?,
        })
    }
}

/// A deleted post kept for restoration.
#[derive(Debug, Clone)]
pub struct Backup {
    pub id: i64,
    pub board: String,
    pub archived_at: i64,
    pub post: Post,
}

impl Backup {
    pub(super) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            board: row.get(1)?,
            archived_at: row.get(2)?,
            post: Post::from_row(row, 3)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub reporter: String,
    pub offender: String,
    pub postnum: i64,
    pub comment: String,
    pub timestamp: i64,
    pub date: String,
}

/// How many posts, threads and bytes a board currently holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardTotals {
    pub threads: i64,
    pub posts: i64,
    pub bytes: i64,
}

/// The fields an edit replaces. `file: None` keeps the current file.
#[derive(Debug, Clone)]
pub struct PostPatch {
    pub name: String,
    pub trip: String,
    pub email: String,
    pub subject: String,
    pub comment: String,
    pub file: Option<Option<FileRecord>>,
    pub lastedit: String,
    pub lastedit_ip: String,
}

impl PostPatch {
    pub fn apply(self, post: &mut Post) {
        post.name = self.name;
        post.trip = self.trip;
        post.email = self.email;
        post.subject = self.subject;
        post.comment = self.comment;
        if let Some(file) = self.file {
            post.file = file;
        }
        post.lastedit = Some(self.lastedit);
        post.lastedit_ip = Some(self.lastedit_ip);
    }
}
