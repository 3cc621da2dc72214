//! `applyDiffToContent`: replay hunks over original lines.

use crate::diff::types::{FileDiff, HunkLine};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("hunk expects context/removed line {expected:?} at original line {line}, found {found:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        found: Option<String>,
    },
}

/// Replay `file_diff`'s hunks over `original`, producing the post-diff
/// content. Line boundaries are preserved: if `original` had no trailing
/// newline and no hunk declares one added, the result won't gain one.
pub fn apply_diff_to_content(original: &str, file_diff: &FileDiff) -> Result<String, ApplyError> {
    let original_had_trailing_newline = original.ends_with('\n') || original.is_empty();
    let original_lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        original.split('\n').collect()
    };
    // split('\n') on a string ending in '\n' yields a trailing empty
    // element; drop it so indices match 1-based line numbers.
    let original_lines: Vec<&str> = if original_had_trailing_newline && !original.is_empty() {
        original_lines[..original_lines.len() - 1].to_vec()
    } else {
        original_lines
    };

    let mut result: Vec<String> = Vec::with_capacity(original_lines.len());
    let mut cursor = 0usize; // 0-based index into original_lines already emitted
    let mut trailing_newline = original_had_trailing_newline;

    for hunk in &file_diff.hunks {
        let hunk_start = hunk.old_start.saturating_sub(1) as usize;
        // Emit unchanged lines before this hunk verbatim.
        while cursor < hunk_start && cursor < original_lines.len() {
            result.push(original_lines[cursor].to_string());
            cursor += 1;
        }

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    if cursor < original_lines.len() && original_lines[cursor] != text.as_str() {
                        return Err(ApplyError::ContextMismatch {
                            line: cursor + 1,
                            expected: text.clone(),
                            found: Some(original_lines[cursor].to_string()),
                        });
                    }
                    result.push(text.clone());
                    cursor += 1;
                }
                HunkLine::Removed(text) => {
                    if cursor < original_lines.len() && original_lines[cursor] != text.as_str() {
                        return Err(ApplyError::ContextMismatch {
                            line: cursor + 1,
                            expected: text.clone(),
                            found: Some(original_lines[cursor].to_string()),
                        });
                    }
                    cursor += 1; // dropped from output
                }
                HunkLine::Added(text) => {
                    result.push(text.clone());
                }
            }
        }

        // The "\ No newline at end of file" marker only ever follows the
        // last line of a hunk that actually reaches the original file's
        // EOF; a hunk that edits an earlier line carries no such marker
        // and must not flip `trailing_newline` on the original's behalf.
        if cursor >= original_lines.len() {
            trailing_newline = !hunk.no_newline_at_eof;
        }
    }

    // Emit any remaining unchanged tail lines.
    while cursor < original_lines.len() {
        result.push(original_lines[cursor].to_string());
        cursor += 1;
    }

    let mut joined = result.join("\n");
    if trailing_newline && !joined.is_empty() {
        joined.push('\n');
    }
    Ok(joined)
}
