//! Lightweight textual-content heuristics.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::signatures::HEADER_LEN;
use super::types::FormatId;

static MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+\S").unwrap());
static MD_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(```|~~~)").unwrap());
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]\n]+\]\([^)\s]+\)").unwrap());
static MD_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*([-*+]|\d+\.)[ \t]+\S").unwrap());

/// Decodes the header as UTF-8, tolerating a multi-byte sequence cut at the end.
fn decode(header: &[u8]) -> Option<&str> {
    if header.contains(&0) {
        return None;
    }
    match std::str::from_utf8(header) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&header[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

fn looks_like_csv(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(10)
        .collect();
    if lines.len() < 2 {
        return false;
    }
    let counts: Vec<usize> = lines.iter().map(|l| l.matches(',').count()).collect();
    counts[0] > 0 && counts.iter().all(|c| *c == counts[0])
}

fn looks_like_markdown(text: &str) -> bool {
    if MD_HEADING.is_match(text) || MD_FENCE.is_match(text) || MD_LINK.is_match(text) {
        return true;
    }
    MD_LIST.find_iter(text).take(2).count() >= 2
}

/// Classifies UTF-8 text by structure. Returns `None` for binary content or
/// text without recognizable structure.
pub fn sniff_text(header: &[u8]) -> Option<FormatId> {
    let text = decode(header)?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.is_empty() {
        return None;
    }

    let prefix: String = trimmed.chars().take(1024).collect::<String>().to_ascii_lowercase();

    if prefix.starts_with("<?xml") {
        if prefix.contains("<svg") {
            return Some(FormatId::new("svg"));
        }
        if prefix.contains("<html") {
            return Some(FormatId::new("html"));
        }
        return Some(FormatId::new("xml"));
    }
    if prefix.starts_with("<svg") {
        return Some(FormatId::new("svg"));
    }
    if prefix.starts_with("<!doctype html")
        || prefix.starts_with("<html")
        || prefix.contains("<body")
        || prefix.contains("<head>")
    {
        return Some(FormatId::new("html"));
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
            return Some(FormatId::new("json"));
        }
        // Truncated documents cannot be parsed whole.
        if header.len() >= HEADER_LEN && trimmed.starts_with('{') && trimmed.contains("\":") {
            return Some(FormatId::new("json"));
        }
    }

    if trimmed.contains("\\documentclass") || trimmed.contains("\\begin{document}") {
        return Some(FormatId::new("tex"));
    }

    if looks_like_markdown(trimmed) {
        return Some(FormatId::new("markdown"));
    }

    if looks_like_csv(trimmed) {
        return Some(FormatId::new("csv"));
    }

    None
}
