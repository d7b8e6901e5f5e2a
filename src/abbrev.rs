//! Shortening of formatted comments for index pages.

const BLOCK_TAGS: [&str; 7] = ["p", "blockquote", "pre", "li", "ol", "ul", "br"];
const VOID_TAGS: [&str; 3] = ["br", "hr", "img"];

enum Token<'a> {
    Text(&'a str),
    Tag {
        name: String,
        closing: bool,
        implicit: bool,
    },
}

/// Splits the next token off `html`, returning it with its byte length.
fn next_token(html: &str) -> (Token<'_>, usize) {
    if let Some(tag) = html.strip_prefix('<') {
        let (closing, body) = match tag.strip_prefix('/') {
            Some(body) => (true, body),
            None => (false, tag),
        };
        let name_len = body
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        let end = body[name_len..].find(['>', '\n']);
        if let (true, Some(end)) = (name_len > 0, end) {
            let end = name_len + end;
            if body[end..].starts_with('>') {
                let name = body[..name_len].to_lowercase();
                let implicit = body[..end].ends_with('/') || VOID_TAGS.contains(&name.as_str());
                let len = 1 + usize::from(closing) + end + 1;
                return (
                    Token::Tag {
                        name,
                        closing,
                        implicit,
                    },
                    len,
                );
            }
        }
        // a stray '<' is just text
        let len = html[1..].find('<').map_or(html.len(), |i| i + 1);
        return (Token::Text(&html[..len]), len);
    }
    let len = html.find('<').unwrap_or(html.len());
    (Token::Text(&html[..len]), len)
}

fn only_end_tags_left(rest: &str) -> bool {
    let mut rest = rest.trim_start();
    while let Some(tag) = rest.strip_prefix("</") {
        let name_len = tag
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(tag.len());
        match tag[name_len..].strip_prefix('>') {
            Some(after) if name_len > 0 => rest = after.trim_start(),
            _ => return false,
        }
    }
    rest.is_empty()
}

/// Cuts `html` after roughly `max_lines` rendered lines, closing any tags left
/// open. Returns `None` when the comment is short enough to show whole, or
/// when `max_lines` is 0.
pub fn abbreviate_html(html: &str, max_lines: usize, approx_len: usize) -> Option<String> {
    if max_lines == 0 {
        return None;
    }
    let approx_len = approx_len.max(1);
    let mut lines = 0usize;
    let mut chars = 0usize;
    let mut stack: Vec<String> = Vec::new();
    let mut pos = 0usize;

    while pos < html.len() {
        let (token, len) = next_token(&html[pos..]);
        pos += len;
        let (name, closing, implicit) = match token {
            Token::Text(text) => {
                chars += text.chars().count();
                continue;
            }
            Token::Tag {
                name,
                closing,
                implicit,
            } => (name, closing, implicit),
        };

        if closing {
            stack.pop();
        } else if !implicit {
            stack.push(name.clone());
        }

        if (closing || implicit) && BLOCK_TAGS.contains(&name.as_str()) {
            lines += chars / approx_len + 1;
            if name == "p" || name == "blockquote" {
                lines += 1;
            }
            chars = 0;
        }

        if lines >= max_lines {
            if only_end_tags_left(&html[pos..]) {
                return None;
            }
            let mut abbrev = html[..pos].to_string();
            while let Some(tag) = stack.pop() {
                abbrev.push_str(&format!("</{tag}>"));
            }
            return Some(abbrev);
        }
    }
    None
}
