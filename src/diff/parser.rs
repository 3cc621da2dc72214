//! UnifiedDiffParser.
//!
//! Consumes standard `--- a/… / +++ b/… / @@ -s,c +s,c @@` headers,
//! classifies file headers by old/new path, accumulates context/+/- lines,
//! normalizes CRLF→LF, and tolerates "\ No newline at end of file"
//! markers.

use crate::diff::types::{FileDiff, Hunk, HunkLine, ParsedDiff};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed hunk header: {0}")]
    MalformedHunkHeader(String),
    #[error("hunk body line outside any hunk: {0}")]
    LineOutsideHunk(String),
    #[error("malformed file header: {0}")]
    MalformedFileHeader(String),
}

const DEV_NULL: &str = "/dev/null";

fn strip_prefix_path(raw: &str) -> String {
    // Standard unified diffs prefix paths with `a/`/`b/`; tolerate an
    // absent prefix too.
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_prefix("a/") {
        stripped.to_string()
    } else if let Some(stripped) = trimmed.strip_prefix("b/") {
        stripped.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_hunk_header(line: &str) -> Result<(u64, u64, u64, u64), ParseError> {
    // @@ -s,c +s,c @@ (count defaults to 1 if omitted)
    let body = line
        .trim_start_matches("@@")
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    let mut parts = body.split_whitespace();
    let old = parts
        .next()
        .ok_or_else(|| ParseError::MalformedHunkHeader(line.to_string()))?;
    let new = parts
        .next()
        .ok_or_else(|| ParseError::MalformedHunkHeader(line.to_string()))?;

    let parse_range = |s: &str| -> Result<(u64, u64), ParseError> {
        let s = s
            .strip_prefix('-')
            .or_else(|| s.strip_prefix('+'))
            .ok_or_else(|| ParseError::MalformedHunkHeader(line.to_string()))?;
        let mut it = s.splitn(2, ',');
        let start = it
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ParseError::MalformedHunkHeader(line.to_string()))?;
        let count = match it.next() {
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| ParseError::MalformedHunkHeader(line.to_string()))?,
            None => 1,
        };
        Ok((start, count))
    };

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Ok((old_start, old_count, new_start, new_count))
}

/// Parse a unified diff into an ordered list of per-file entries.
pub fn parse_unified_diff(input: &str) -> Result<ParsedDiff, ParseError> {
    let normalized = input.replace("\r\n", "\n");
    let mut files = Vec::new();
    let mut lines = normalized.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("--- ") {
            continue;
        }
        let old_header = line.trim_start_matches("--- ").trim();

        let plus_line = lines
            .next()
            .ok_or_else(|| ParseError::MalformedFileHeader(line.to_string()))?;
        if !plus_line.starts_with("+++ ") {
            return Err(ParseError::MalformedFileHeader(plus_line.to_string()));
        }
        let new_header = plus_line.trim_start_matches("+++ ").trim();

        let is_create = old_header == DEV_NULL;
        let is_delete = new_header == DEV_NULL;
        let old_path = if is_create {
            None
        } else {
            Some(strip_prefix_path(old_header))
        };
        let new_path = if is_delete {
            None
        } else {
            Some(strip_prefix_path(new_header))
        };
        let is_rename = !is_create && !is_delete && old_path != new_path;

        let mut file_diff = FileDiff {
            old_path,
            new_path,
            hunks: Vec::new(),
            additions: 0,
            deletions: 0,
            is_create,
            is_delete,
            is_rename,
            has_mode_change: false,
        };

        // Consume hunks belonging to this file header.
        while let Some(&next) = lines.peek() {
            if next.starts_with("--- ") {
                break;
            }
            if next.starts_with("old mode") || next.starts_with("new mode") {
                file_diff.has_mode_change = true;
                lines.next();
                continue;
            }
            if !next.starts_with("@@") {
                // Stray blank lines / index headers between file blocks.
                lines.next();
                continue;
            }
            let header = lines.next().unwrap();
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(header)?;
            let mut hunk = Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: Vec::new(),
                no_newline_at_eof: false,
            };

            let mut old_remaining = old_count;
            let mut new_remaining = new_count;
            while old_remaining > 0 || new_remaining > 0 {
                let body_line = lines.next().ok_or_else(|| {
                    ParseError::MalformedHunkHeader(header.to_string())
                })?;
                if let Some(rest) = body_line.strip_prefix('+') {
                    hunk.lines.push(HunkLine::Added(rest.to_string()));
                    file_diff.additions += 1;
                    new_remaining = new_remaining.saturating_sub(1);
                } else if let Some(rest) = body_line.strip_prefix('-') {
                    hunk.lines.push(HunkLine::Removed(rest.to_string()));
                    file_diff.deletions += 1;
                    old_remaining = old_remaining.saturating_sub(1);
                } else if let Some(rest) = body_line.strip_prefix(' ') {
                    hunk.lines.push(HunkLine::Context(rest.to_string()));
                    old_remaining = old_remaining.saturating_sub(1);
                    new_remaining = new_remaining.saturating_sub(1);
                } else if body_line.starts_with("\\ No newline at end of file") {
                    hunk.no_newline_at_eof = true;
                } else if body_line.is_empty() {
                    hunk.lines.push(HunkLine::Context(String::new()));
                    old_remaining = old_remaining.saturating_sub(1);
                    new_remaining = new_remaining.saturating_sub(1);
                } else {
                    return Err(ParseError::LineOutsideHunk(body_line.to_string()));
                }
            }

            // Tolerate a trailing no-newline marker right after the hunk body.
            if let Some(&next) = lines.peek() {
                if next.starts_with("\\ No newline at end of file") {
                    hunk.no_newline_at_eof = true;
                    lines.next();
                }
            }

            file_diff.hunks.push(hunk);
        }

        files.push(file_diff);
    }

    Ok(ParsedDiff { files })
}
