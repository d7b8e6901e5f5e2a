//! Header-only image identification.
//!
//! Each analyzer reads just enough of the stream to find the dimensions and
//! always leaves the cursor back at the start, so the next analyzer can try
//! the same stream.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{PostError, Result};

const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Lower-cased extension without the dot.
    pub ext: String,
    pub width: u32,
    pub height: u32,
}

impl FileInfo {
    pub fn is_image(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

pub fn analyze<R: Read + Seek>(file: &mut R, filename: &str) -> Result<FileInfo> {
    let analyzers: [(&str, fn(&mut R) -> Result<Option<(u32, u32)>>); 3] = [
        ("jpg", analyze_jpeg::<R>),
        ("png", analyze_png::<R>),
        ("gif", analyze_gif::<R>),
    ];
    for (ext, analyzer) in analyzers {
        if let Some((width, height)) = analyzer(file)? {
            return Ok(FileInfo {
                ext: ext.to_string(),
                width,
                height,
            });
        }
    }
    Ok(FileInfo {
        ext: extension_of(filename),
        width: 0,
        height: 0,
    })
}

pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.contains(['/', '\\']) => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Reads exactly `buf.len()` bytes; `false` on a short stream.
fn fill<R: Read>(file: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn rewound<R: Seek, T>(file: &mut R, value: T) -> Result<T> {
    file.seek(SeekFrom::Start(0))?;
    Ok(value)
}

pub fn analyze_png<R: Read + Seek>(file: &mut R) -> Result<Option<(u32, u32)>> {
    let mut buf = [0u8; 24];
    if !fill(file, &mut buf)? || &buf[..8] != PNG_MAGIC || &buf[12..16] != b"IHDR" {
        return rewound(file, None);
    }
    let width = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
    let height = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
    rewound(file, Some((width, height)))
}

pub fn analyze_gif<R: Read + Seek>(file: &mut R) -> Result<Option<(u32, u32)>> {
    let mut buf = [0u8; 10];
    if !fill(file, &mut buf)? || !(&buf[..6] == b"GIF87a" || &buf[..6] == b"GIF89a") {
        return rewound(file, None);
    }
    let width = u16::from_le_bytes([buf[6], buf[7]]) as u32;
    let height = u16::from_le_bytes([buf[8], buf[9]]) as u32;
    rewound(file, Some((width, height)))
}

pub fn analyze_jpeg<R: Read + Seek>(file: &mut R) -> Result<Option<(u32, u32)>> {
    match scan_jpeg(file) {
        Ok(found) => rewound(file, found),
        Err(e) => {
            file.seek(SeekFrom::Start(0))?;
            Err(e)
        }
    }
}

fn scan_jpeg<R: Read + Seek>(file: &mut R) -> Result<Option<(u32, u32)>> {
    let mut soi = [0u8; 2];
    if !fill(file, &mut soi)? || soi != [0xff, 0xd8] {
        return Ok(None);
    }
    let mut byte = [0u8; 1];
    loop {
        // skip to the next marker
        loop {
            if !fill(file, &mut byte)? {
                return Ok(None);
            }
            if byte[0] == 0xff {
                break;
            }
        }
        let mut header = [0u8; 3];
        if !fill(file, &mut header)? {
            return Ok(None);
        }
        let mark = header[0];
        let size = u16::from_be_bytes([header[1], header[2]]);
        if mark == 0xda || mark == 0xd9 {
            return Ok(None);
        }
        // short segments are the GDI+ overflow exploit
        if size < 2 {
            return Err(PostError::PotentialExploit);
        }
        if (0xc0..=0xc2).contains(&mark) {
            let mut sof = [0u8; 5];
            if !fill(file, &mut sof)? {
                return Ok(None);
            }
            let height = u16::from_be_bytes([sof[1], sof[2]]) as u32;
            let width = u16::from_be_bytes([sof[3], sof[4]]) as u32;
            return Ok(Some((width, height)));
        }
        file.seek(SeekFrom::Current(size as i64 - 2))?;
    }
}

/// GIFs carrying the Netscape looping extension are treated as animated.
pub fn is_animated_gif(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GIF8") && bytes.windows(11).any(|w| w == b"NETSCAPE2.0")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let mut v = PNG_MAGIC.to_vec();
        v.extend_from_slice(&13u32.to_be_bytes());
        v.extend_from_slice(b"IHDR");
        v.extend_from_slice(&width.to_be_bytes());
        v.extend_from_slice(&height.to_be_bytes());
        v.extend_from_slice(&[8, 6, 0, 0, 0, 0, 0, 0, 0]);
        v
    }

    fn jpeg(segment_len: u16) -> Vec<u8> {
        let mut v = vec![0xff, 0xd8];
        // APP0 segment
        v.extend_from_slice(&[0xff, 0xe0]);
        v.extend_from_slice(&segment_len.to_be_bytes());
        v.extend(std::iter::repeat(0u8).take(segment_len.saturating_sub(2) as usize));
        // SOF0: precision, height 480, width 640
        v.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08, 0x01, 0xe0, 0x02, 0x80]);
        v.extend_from_slice(&[0u8; 12]);
        v
    }

    #[test]
    fn sniffs_png() {
        let mut c = Cursor::new(png(320, 240));
        let info = analyze(&mut c, "whatever.bin").unwrap();
        assert_eq!(info, FileInfo { ext: "png".into(), width: 320, height: 240 });
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn truncated_png_is_unknown() {
        let data = png(320, 240)[..10].to_vec();
        let mut c = Cursor::new(data);
        let info = analyze(&mut c, "cut.PNG").unwrap();
        assert_eq!(info, FileInfo { ext: "png".into(), width: 0, height: 0 });
        assert!(!info.is_image());
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn sniffs_gif() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&[0x40, 0x01, 0xf0, 0x00, 0, 0, 0]);
        let mut c = Cursor::new(data);
        let info = analyze(&mut c, "a.gif").unwrap();
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!(info.ext, "gif");
    }

    #[test]
    fn sniffs_jpeg_after_segments() {
        let mut c = Cursor::new(jpeg(16));
        let info = analyze(&mut c, "x").unwrap();
        assert_eq!(info, FileInfo { ext: "jpg".into(), width: 640, height: 480 });
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn short_jpeg_segment_is_an_exploit() {
        let mut c = Cursor::new(jpeg(1));
        let err = analyze(&mut c, "evil.jpg").unwrap_err();
        assert!(matches!(err, PostError::PotentialExploit));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn unknown_falls_back_to_extension() {
        let mut c = Cursor::new(b"PK\x03\x04 zip data".to_vec());
        let info = analyze(&mut c, "dir.v2/Archive.ZIP").unwrap();
        assert_eq!(info.ext, "zip");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of("a.b/noext"), "");
    }

    #[test]
    fn detects_animation() {
        let mut data = b"GIF89a\x01\x00\x01\x00".to_vec();
        data.extend_from_slice(b"\x21\xff\x0bNETSCAPE2.0\x03\x01\x00\x00\x00");
        assert!(is_animated_gif(&data));
        assert!(!is_animated_gif(b"GIF89a\x01\x00\x01\x00"));
    }
}
