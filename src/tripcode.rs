//! Tripcodes: `name#secret` becomes `name` plus a deterministic signature.
//!
//! `name#phrase` gives a legacy trip (DES crypt over the Shift_JIS bytes of
//! the phrase). `name##phrase` gives a secure trip keyed by the site secret.
//! `name#legacy#secure` gives both, legacy first.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use encoding_rs::SHIFT_JIS;

use crate::format::clean_string;

const SECURE_LEN: usize = 6;
const KEY_TAG: &str = "trip";

/// RC4 with the first `skip` keystream bytes discarded.
pub fn rc4(message: &[u8], key: &[u8], skip: usize) -> Vec<u8> {
    let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
    if key.is_empty() {
        return message.to_vec();
    }
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }
    let (mut x, mut y) = (0u8, 0u8);
    let mut next = || {
        x = x.wrapping_add(1);
        y = y.wrapping_add(s[x as usize]);
        s.swap(x as usize, y as usize);
        s[s[x as usize].wrapping_add(s[y as usize]) as usize]
    };
    for _ in 0..skip {
        next();
    }
    message.iter().map(|b| b ^ next()).collect()
}

/// Derives a fixed-length key for one purpose from the site secret.
pub fn make_key(tag: &str, secret: &str, len: usize) -> Vec<u8> {
    let key = [tag.as_bytes(), secret.as_bytes()].concat();
    rc4(&vec![0; len], &key, 256)
}

pub fn hide_data(data: &[u8], bytes: usize, tag: &str, secret: &str) -> Vec<u8> {
    let key = [make_key(tag, secret, 32).as_slice(), data].concat();
    rc4(&vec![0; bytes], &key, 256)
}

/// Finds the first character that starts the trip part: the tripkey, or a
/// `#` not preceded by `&` (so `&#123;` entities survive in names).
fn split_marker(name: &str, tripkey: char) -> Option<(usize, char)> {
    let mut prev = None;
    for (i, c) in name.char_indices() {
        if c == tripkey || (c == '#' && prev != Some('&')) {
            return Some((i, c));
        }
        prev = Some(c);
    }
    None
}

fn legacy_salt(bytes: &[u8]) -> String {
    let mut padded = bytes.to_vec();
    padded.extend_from_slice(b"H..");
    padded[1..3]
        .iter()
        .map(|&b| {
            let b = if (b'.'..=b'z').contains(&b) { b } else { b'.' };
            match b {
                b':'..=b'@' => (b'A' + (b - b':')) as char,
                b'['..=b'`' => (b'a' + (b - b'[')) as char,
                b => b as char,
            }
        })
        .collect()
}

#[allow(deprecated)]
fn legacy_trip(phrase: &str, tripkey: char) -> Option<String> {
    let cleaned = clean_string(phrase);
    let (bytes, _, _) = SHIFT_JIS.encode(&cleaned);
    let salt = legacy_salt(&bytes);
    match pwhash::unix_crypt::hash_with(&salt, &*bytes) {
        Ok(hash) => {
            let start = hash.len().saturating_sub(10);
            Some(format!("{tripkey}{}", &hash[start..]))
        }
        Err(e) => {
            tracing::warn!("Legacy tripcode hashing failed: {e}");
            None
        }
    }
}

fn secure_trip(phrase: &str, secret: &str, tripkey: char) -> String {
    let max_len = 255usize.saturating_sub(secret.len());
    let mut end = phrase.len().min(max_len);
    while !phrase.is_char_boundary(end) {
        end -= 1;
    }
    let hidden = hide_data(phrase[..end].as_bytes(), SECURE_LEN, KEY_TAG, secret);
    format!("{tripkey}{tripkey}{}", STANDARD.encode(hidden))
}

/// Splits `name` into its cleaned display part and the derived tripcode
/// (empty when no marker is present).
pub fn process_tripcode(name: &str, tripkey: char, secret: &str) -> (String, String) {
    let Some((at, marker)) = split_marker(name, tripkey) else {
        return (clean_string(name), String::new());
    };
    let namepart = &name[..at];
    let mut trippart = &name[at + marker.len_utf8()..];
    let mut trip = String::new();

    if !secret.is_empty() {
        if let Some((i, _)) = split_marker_only(trippart, marker) {
            let phrase = trippart[i + marker.len_utf8()..].trim_start_matches(marker);
            trip = secure_trip(phrase, secret, tripkey);
            trippart = &trippart[..i];
        }
    }

    if !trippart.is_empty() {
        if let Some(legacy) = legacy_trip(trippart, tripkey) {
            trip = legacy + &trip;
        }
    }
    (clean_string(namepart), trip)
}

/// Like `split_marker` but only for the marker that opened the trip part.
fn split_marker_only(trippart: &str, marker: char) -> Option<(usize, char)> {
    let mut prev = None;
    for (i, c) in trippart.char_indices() {
        if c == marker && !(marker == '#' && prev == Some('&')) {
            return Some((i, c));
        }
        prev = Some(c);
    }
    None
}
