//! Turns raw rsync output into [`OutputEvent`]s.
//!
//! rsync redraws progress in place with `\r`, and stdout/stderr arrive on
//! separate pipes, so a single read may carry several logical lines. Every
//! segment is classified on its own; nothing here can fail.

use crate::rsync::types::{OutputEvent, Severity};

const ERROR_MARKERS: &[&str] = &[
    "failed",
    "denied",
    "fatal",
    "no space left",
    "cannot",
];

/// Classify one chunk read from the process (one `\n`-terminated read).
pub fn classify_chunk(chunk: &str) -> Vec<OutputEvent> {
    chunk
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(classify_line)
        .collect()
}

/// Classify a single, already trimmed, non-empty line.
pub fn classify_line(line: &str) -> OutputEvent {
    if let Some((percent, filename)) = parse_progress(line) {
        return OutputEvent::Progress { percent, filename };
    }
    OutputEvent::log(severity_of(line), line)
}

pub fn severity_of(line: &str) -> Severity {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") {
        Severity::Error
    } else if lower.contains("warning") {
        Severity::Warning
    } else if lower.starts_with("rsync:") || ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        Severity::Error
    } else {
        Severity::Info
    }
}

/// Progress lines look like `  45%  12,345  file.txt` or rsync's own
/// `  32,768 100%   31.25MB/s    0:00:00 (xfr#1, to-chk=0/1)`.
fn parse_progress(line: &str) -> Option<(u8, Option<String>)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (pos, percent) = tokens
        .iter()
        .enumerate()
        .find_map(|(i, t)| parse_percent(t).map(|p| (i, p)))?;

    // Everything before the percent must be a byte count, otherwise this is
    // a log line that happens to mention a percentage.
    if !tokens[..pos].iter().all(|t| is_number(t)) {
        return None;
    }
    // Without a leading count, a size or rate must follow the percent.
    if pos == 0 && !tokens.get(1).is_some_and(|t| is_number(t) || t.ends_with("/s")) {
        return None;
    }

    let filename = tokens[pos + 1..]
        .iter()
        .rev()
        .find(|t| !is_progress_field(t))
        .map(|t| t.to_string());

    Some((percent, filename))
}

fn parse_percent(token: &str) -> Option<u8> {
    let digits = token.strip_suffix('%')?;
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u8 = digits.parse().ok()?;
    (value <= 100).then_some(value)
}

fn is_number(token: &str) -> bool {
    let cleaned = token.trim_end_matches(['K', 'M', 'G', 'T', 'k', 'B']);
    !cleaned.is_empty()
        && cleaned
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b',' || b == b'.')
}

fn is_progress_field(token: &str) -> bool {
    is_number(token)
        || token.ends_with("/s")
        || is_duration(token)
        || token.starts_with('(')
        || token.ends_with(')')
        || token.contains("to-chk=")
        || token.contains("to-check=")
        || token.contains("ir-chk=")
}

fn is_duration(token: &str) -> bool {
    token.contains(':') && token.bytes().all(|b| b.is_ascii_digit() || b == b':')
}
