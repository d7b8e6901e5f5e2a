//! Thumbnail generation through an external ImageMagick-style command, and
//! the file(1) content check.

use std::{
    fs,
    path::Path,
    process::{Command, Stdio},
};

use crate::error::{PostError, Result};

/// Height added to animated GIF thumbnails for the "Animated" label.
pub const BADGE_HEIGHT: u32 = 12;

/// Fits `width`x`height` into the `max_w`x`max_h` box, keeping the aspect
/// ratio. Sizes that already fit are returned unchanged.
pub fn fit(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let (w, h) = (width as u64, height as u64);
    let mut tn_w = max_w as u64;
    let mut tn_h = h * max_w as u64 / w.max(1);
    if tn_h > max_h as u64 {
        tn_w = w * max_h as u64 / h.max(1);
        tn_h = max_h as u64;
    }
    (tn_w.max(1) as u32, tn_h.max(1) as u32)
}

/// Splits a configured command line into program and leading arguments.
fn command_from(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let mut cmd = Command::new(parts.next()?);
    cmd.args(parts);
    Some(cmd)
}

pub struct ThumbnailRequest<'a> {
    pub src: &'a Path,
    pub dst: &'a Path,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub gif: bool,
    /// Label animated GIFs; the caller adds `BADGE_HEIGHT` to the height.
    pub animated: bool,
}

/// Runs the converter. Returns `false` (and removes any partial output) when
/// the command is missing, fails, or writes nothing.
pub fn make_thumbnail(convert_command: &str, req: &ThumbnailRequest) -> bool {
    let Some(mut cmd) = command_from(convert_command) else {
        return false;
    };
    let size = format!("{}x{}", req.width, req.height);
    let mut src = req.src.as_os_str().to_owned();
    if req.gif {
        src.push("[0]");
    }
    cmd.arg("-size")
        .arg(&size)
        .arg("-geometry")
        .arg(format!("{size}!"))
        .arg("-quality")
        .arg(req.quality.to_string())
        .arg(src);
    if req.animated {
        cmd.args(["-background", "#ffffff", "-gravity", "south", "-splice"])
            .arg(format!("0x{BADGE_HEIGHT}"))
            .args(["-pointsize", "10", "-annotate", "+0+0", "Animated"]);
    }
    cmd.arg(req.dst)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let ok = match cmd.status() {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!("Failed to run thumbnail command: {e}");
            false
        }
    };
    let written = fs::metadata(req.dst).map(|m| m.len() > 0).unwrap_or(false);
    if ok && written {
        return true;
    }
    if req.dst.exists() {
        if let Err(e) = fs::remove_file(req.dst) {
            tracing::warn!("Failed to remove {}: {e}", req.dst.display());
        }
    }
    false
}

/// Rejects images that file(1) describes as scripts, text or executables.
/// A missing or failing command only skips the check.
pub fn check_file_type(file_command: &str, path: &Path) -> Result<()> {
    let Some(mut cmd) = command_from(file_command) else {
        return Ok(());
    };
    let output = match cmd.arg("--brief").arg(path).stdin(Stdio::null()).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::warn!("File type check exited with {}", output.status);
            return Ok(());
        }
        Err(e) => {
            tracing::warn!("Failed to run file type check: {e}");
            return Ok(());
        }
    };
    let description = String::from_utf8_lossy(&output.stdout).to_lowercase();
    if ["script", "text", "executable"]
        .iter()
        .any(|word| description.contains(word))
    {
        return Err(PostError::PotentialExploit);
    }
    Ok(())
}
