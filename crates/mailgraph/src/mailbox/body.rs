//! Message body extraction and file naming.

use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;

use super::error::{MailboxError, Result};
use super::types::MessagePart;

/// Gmail emits base64url both with and without padding.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    BASE64URL
        .decode(data.trim())
        .map_err(|e| MailboxError::Decode(format!("invalid base64url data: {}", e)))
}

/// A message payload seen as a tree of leaves and multipart containers.
#[derive(Debug, PartialEq)]
pub enum BodyNode<'a> {
    Leaf {
        mime_type: &'a str,
        data: Option<&'a str>,
    },
    Multipart(Vec<BodyNode<'a>>),
}

impl<'a> BodyNode<'a> {
    pub fn from_part(part: &'a MessagePart) -> Self {
        if part.parts.is_empty() {
            BodyNode::Leaf {
                mime_type: part.mime_type.as_str(),
                data: part.body.as_ref().and_then(|b| b.data.as_deref()),
            }
        } else {
            BodyNode::Multipart(part.parts.iter().map(BodyNode::from_part).collect())
        }
    }

    /// Depth-first search for the first leaf of `mime_type` that carries data.
    pub fn find_leaf(&self, mime_type: &str) -> Option<&'a str> {
        match self {
            BodyNode::Leaf {
                mime_type: leaf_type,
                data: Some(data),
            } if leaf_type.eq_ignore_ascii_case(mime_type) => Some(*data),
            BodyNode::Leaf { .. } => None,
            BodyNode::Multipart(children) => children.iter().find_map(|c| c.find_leaf(mime_type)),
        }
    }
}

/// Returns the message text: the first `text/plain` leaf depth-first, or the
/// first `text/html` leaf with markup stripped when no plain part exists.
pub fn extract_body_text(payload: &MessagePart) -> Result<Option<String>> {
    let tree = BodyNode::from_part(payload);

    if let Some(data) = tree.find_leaf("text/plain") {
        return decode_text(data).map(Some);
    }
    if let Some(data) = tree.find_leaf("text/html") {
        return decode_text(data).map(|html| Some(html_to_text(&html)));
    }
    Ok(None)
}

fn decode_text(data: &str) -> Result<String> {
    let bytes = decode_base64url(data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn html_to_text(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));

    let text = blocks.replace_all(html, "");
    let text = text.replace("<br>", "\n").replace("<br/>", "\n").replace("</p>", "\n");
    let text = tags.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .trim()
        .to_string()
}

/// Cuts the quoted history off a reply: everything from the first reply
/// header ("On ... wrote:", "Le ... a écrit :", an "Original Message"
/// separator, or a "From:"/"De :" line followed by "Sent:"/"Envoyé :").
/// Trailing `>`-quoted lines are dropped as well.
pub fn strip_quoted_history(body: &str) -> String {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    static HEADER_PAIR: OnceLock<(Regex, Regex)> = OnceLock::new();
    let markers = MARKERS.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(on\s.+\swrote:\s*$|le\s.+\sa\s+écrit\s*:\s*$|-{2,}\s*(original message|forwarded message|message d'origine|message transféré))",
        )
        .expect("valid regex")
    });
    let (from_line, sent_line) = HEADER_PAIR.get_or_init(|| {
        (
            Regex::new(r"(?i)^\s*(from|de)\s?:").expect("valid regex"),
            Regex::new(r"(?i)^\s*(sent|envoyé|date)\s?:").expect("valid regex"),
        )
    });

    let lines: Vec<&str> = body.lines().collect();
    let cut = lines
        .iter()
        .enumerate()
        .position(|(i, line)| {
            markers.is_match(line)
                || (from_line.is_match(line)
                    && lines.get(i + 1).is_some_and(|next| sent_line.is_match(next)))
        })
        .unwrap_or(lines.len());

    let mut kept = &lines[..cut];
    while let Some((last, rest)) = kept.split_last() {
        if last.trim().is_empty() || last.trim_start().starts_with('>') {
            kept = rest;
        } else {
            break;
        }
    }
    kept.join("\n")
}

/// Extracts the address from a `From` header: the last whitespace-separated
/// token with angle brackets removed.
pub fn sender_address(from_header: &str) -> String {
    let address = from_header
        .split_whitespace()
        .last()
        .map(|token| token.trim_matches(|c| c == '<' || c == '>'))
        .unwrap_or("");
    let address: String = address
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\')
        .collect();
    if address.is_empty() {
        "unknown".to_string()
    } else {
        address
    }
}

/// Turns a subject into a file name fragment: ASCII punctuation removed,
/// whitespace runs collapsed to `_`.
pub fn subject_slug(subject: &str) -> String {
    let cleaned: String = subject
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !c.is_control())
        .collect();
    let slug = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    truncate_chars(&slug, 100)
}

/// `<sender>_<subject>.txt`
pub fn body_file_name(from_header: &str, subject: &str) -> String {
    format!("{}_{}.txt", sender_address(from_header), subject_slug(subject))
}

/// Keeps an attachment name safe to join onto a message folder.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');

    if cleaned.is_empty() {
        return "attachment".to_string();
    }
    match cleaned.rfind('.') {
        Some(dot) if cleaned.chars().count() > 200 => {
            let ext = &cleaned[dot..];
            format!("{}{}", truncate_chars(&cleaned[..dot], 190), truncate_chars(ext, 10))
        }
        _ => truncate_chars(cleaned, 200),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
