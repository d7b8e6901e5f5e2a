//! Field cleanup and comment formatting.

use std::sync::OnceLock;

use bbscope::{BBCode, BBCodeTagConfig};
use chrono::{TimeZone, Utc};

static BBCODE: OnceLock<BBCode> = OnceLock::new();

fn init_bbcode() -> BBCode {
    let config = BBCodeTagConfig {
        accepted_tags: vec![
            "b".into(),
            "i".into(),
            "sup".into(),
            "sub".into(),
            "u".into(),
            "s".into(),
        ],
        ..Default::default()
    };
    BBCode::from_config(config, None).expect("static bbcode tag config")
}

fn is_control(c: char) -> bool {
    matches!(c, '\x00'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f')
}

fn forbidden_unicode(digits: &str, num: u32) -> bool {
    digits.len() > 7
        || num > 0x10ffff
        || num < 32
        || (0xd800..=0xdfff).contains(&num)
        || (0x202a..=0x202e).contains(&num)
}

/// Parses a numeric entity body (`#123` or `#x7b`) followed by `;`, returning
/// the entity length including the `;` and the code point.
fn numeric_entity(rest: &str) -> Option<(usize, &str, Option<u32>)> {
    let body = rest.strip_prefix('#')?;
    let (digits, radix, prefix) = match body.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 16, 2),
        None => (body, 10, 1),
    };
    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if len == 0 || !digits[len..].starts_with(';') {
        return None;
    }
    let digits = &digits[..len];
    Some((prefix + len + 1, digits, u32::from_str_radix(digits, radix).ok()))
}

/// Makes a user-supplied field safe to embed in HTML. Well-formed numeric
/// entities survive unless they name a forbidden code point.
pub fn clean_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(c) = rest.chars().next() {
        let mut advance = c.len_utf8();
        match c {
            '&' => match numeric_entity(&rest[1..]) {
                Some((len, digits, num)) => {
                    let forbidden = num.map_or(true, |n| forbidden_unicode(digits, n));
                    if !forbidden {
                        out.push_str(&rest[..=len]);
                    }
                    advance = len + 1;
                }
                None => out.push_str("&amp;"),
            },
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            ',' => out.push_str("&#44;"),
            c if is_control(c) => {}
            c => out.push(c),
        }
        rest = &rest[advance..];
    }
    out
}

pub fn strip_control(input: &str) -> String {
    input.chars().filter(|&c| !is_control(c)).collect()
}

/// Formats a raw comment: BBCode subset, `>` quote lines, `>>N` references
/// and line breaks. `link_for` resolves a post number to its URL.
pub fn format_comment<F>(raw: &str, link_for: F) -> String
where
    F: Fn(i64) -> Option<String>,
{
    let bbcode = BBCODE.get_or_init(init_bbcode);
    let raw = strip_control(raw);
    let lines: Vec<String> = raw
        .trim_end()
        .lines()
        .map(|line| {
            let parsed = bbcode.parse(line);
            let parsed = link_references(&parsed, &link_for);
            if is_quote_line(&parsed) {
                format!("<span class=\"unkfunc\">{parsed}</span>")
            } else {
                parsed
            }
        })
        .collect();
    lines.join("<br />")
}

/// Formatting for boards with markup disabled: escape and keep line breaks.
pub fn plain_comment(raw: &str) -> String {
    raw.trim_end()
        .lines()
        .map(clean_string)
        .collect::<Vec<_>>()
        .join("<br />")
}

fn is_quote_line(line: &str) -> bool {
    (line.starts_with("&gt;") && !line.starts_with("&gt;&gt;")) || line.starts_with('>')
}

fn link_references<F>(line: &str, link_for: &F) -> String
where
    F: Fn(i64) -> Option<String>,
{
    const MARK: &str = "&gt;&gt;";
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = rest.find(MARK) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + MARK.len()..];
        let digits = after
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after.len());
        match after[..digits].parse::<i64>().ok().and_then(|n| link_for(n)) {
            Some(url) => {
                out.push_str(&format!(
                    "<a href=\"{url}\" onclick=\"highlight({})\">{MARK}{}</a>",
                    &after[..digits],
                    &after[..digits]
                ));
            }
            None => {
                out.push_str(MARK);
                out.push_str(&after[..digits]);
            }
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

/// Post date as shown on pages, e.g. `23/11/14(Tue)22:13`.
pub fn make_date(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(time) => time.format("%y/%m/%d(%a)%H:%M").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_markup_and_commas() {
        assert_eq!(
            clean_string("<b>\"hi\", 'there' & you</b>"),
            "&lt;b&gt;&quot;hi&quot;&#44; &#39;there&#39; &amp; you&lt;/b&gt;"
        );
    }

    #[test]
    fn keeps_valid_entities_and_drops_forbidden() {
        assert_eq!(clean_string("&#9829; &#x2665;"), "&#9829; &#x2665;");
        assert_eq!(clean_string("a&#8238;b"), "ab");
        assert_eq!(clean_string("a&#1;b"), "ab");
        assert_eq!(clean_string("&#123"), "&amp;#123");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(clean_string("a\x07b\tc"), "ab\tc");
    }

    #[test]
    fn formats_lines_and_quotes() {
        let html = format_comment(">implying\nsecond line", |_| None);
        assert!(html.contains("class=\"unkfunc\""));
        assert!(html.contains("<br />"));
        assert!(!html.contains("<script>"));
        let html = format_comment("<script>alert(1)</script>", |_| None);
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn links_known_references() {
        let out = link_references("see &gt;&gt;12 and &gt;&gt;99", &|n| {
            (n == 12).then(|| "/b/res/10.html#12".to_string())
        });
        assert!(out.contains("<a href=\"/b/res/10.html#12\""));
        assert!(out.ends_with("and &gt;&gt;99"));
    }

    #[test]
    fn dates_are_utc() {
        assert_eq!(make_date(1_700_000_000), "23/11/14(Tue)22:13");
    }

    #[test]
    fn plain_comment_escapes() {
        assert_eq!(plain_comment("a<b\nc\n\n"), "a&lt;b<br />c");
    }
}
