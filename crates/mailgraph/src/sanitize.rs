//! Helpers for keeping mailbox content and credentials out of log output.
//!
//! Message folders are named after senders and subjects, and connection URIs
//! may carry userinfo, so anything that lands in a span field or log line
//! goes through one of these first.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks userinfo in a URL or connection URI.
///
/// - `neo4j+s://neo4j:pw@db.example.com:7687` -> `neo4j+s://****@db.example.com:7687`
/// - `https://api.example.com/upload` -> unchanged
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let after_scheme = &url[scheme_end + 3..];
    let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
    match after_scheme[..authority_end].rfind('@') {
        Some(at_pos) => format!(
            "{}****@{}",
            &url[..scheme_end + 3],
            &after_scheme[at_pos + 1..]
        ),
        None => url.to_string(),
    }
}

/// Shortens an email address to its domain, e.g. `jane@example.com` -> `*@example.com`.
pub fn redact_address(address: &str) -> String {
    match address.rsplit_once('@') {
        Some((_, domain)) => format!("*@{}", domain),
        None => "*".to_string(),
    }
}
