//! Failures surfaced by the posting pipeline.
//!
//! Every variant's `Display` text is what the submitter sees. `kind()` groups
//! the variants for the HTTP boundary and for logging.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    RateLimit,
    DuplicateContent,
    UnsupportedFormat,
    Storage,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodKind {
    Post,
    File,
    Repeat,
    Report,
}

#[derive(Error, Debug)]
pub enum PostError {
    #[error("Error: Unjust POST.")]
    UnjustMethod,
    #[error("Error: Thread does not exist.")]
    NoThread,
    #[error("Error: Abnormal reply.")]
    NotAThread,
    #[error("Error: Cannot find record.")]
    NoRecord,
    #[error("Error: No file selected. Did you forget to click \"Reply\"?")]
    NoFile,
    #[error("Error: No comment entered.")]
    NoText,
    #[error("Error: Too many characters in text field.")]
    TooLong,
    #[error("This image is too large!  Upload something smaller!")]
    TooBig,
    #[error("Error: Posting not allowed.")]
    NotAllowed,
    #[error("Error: A file with the same name already exists.")]
    DuplicateName,
    #[error("Error: No reason given for the report.")]
    NoReason,
    #[error("Error: Unknown board.")]
    UnknownBoard,

    #[error("Error: This thread is locked.")]
    ThreadLocked,
    #[error("Error: Incorrect password for deletion.")]
    BadPassword,
    #[error("Error: Management password incorrect, or login timed out.")]
    NotElevated,

    #[error("{}", flood_message(*.0))]
    Flood(FloodKind),

    #[error("Error: This file has already been posted <a href=\"{link}\">here</a>.")]
    Duplicate { link: String },

    #[error("Error: File format not supported.")]
    BadFormat,
    #[error("Error: Possible virus-infected file.")]
    PotentialExploit,

    #[error("Error: Could not write to directory.")]
    Storage(#[from] std::io::Error),
    #[error("Critical SQL problem!")]
    Database(#[from] rusqlite::Error),
    #[error("Error: Upload failed.")]
    Internal(String),
}

fn flood_message(kind: FloodKind) -> &'static str {
    match kind {
        FloodKind::Post => "Error: Flood detected, post discarded.",
        FloodKind::File => "Error: Flood detected, file discarded.",
        FloodKind::Repeat => "Error: Flood detected.",
        FloodKind::Report => "Error: You are reporting too fast.",
    }
}

impl PostError {
    pub fn kind(&self) -> ErrorKind {
        use PostError::*;
        match self {
            UnjustMethod | NoThread | NotAThread | NoRecord | NoFile | NoText | TooLong | TooBig
            | NotAllowed | DuplicateName | NoReason | UnknownBoard => ErrorKind::Validation,
            ThreadLocked | BadPassword | NotElevated => ErrorKind::Authorization,
            Flood(_) => ErrorKind::RateLimit,
            Duplicate { .. } => ErrorKind::DuplicateContent,
            BadFormat | PotentialExploit => ErrorKind::UnsupportedFormat,
            Storage(_) => ErrorKind::Storage,
            Database(_) | Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PostError>;
