//! L0 — Preflight: derive the target file set and estimate
//! complexity before ever calling the model.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct PreflightResult {
    pub target_files: Vec<String>,
    pub complexity: Complexity,
    /// "returns `shouldSplit` if file count > 1 or
    /// complexity = high."
    pub should_split: bool,
}

/// A conservative path-looking token: a run of path segments ending in a
/// dotted extension. Intentionally permissive — false positives only
/// widen the target file set, which L2 handles safely per-file.
fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,8}").unwrap())
}

fn extract_paths_from_description(description: &str) -> Vec<String> {
    path_pattern()
        .find_iter(description)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn estimate_complexity(file_count: usize, total_context_lines: usize) -> Complexity {
    if file_count > 5 || total_context_lines > 2000 {
        Complexity::High
    } else if file_count > 1 || total_context_lines > 500 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

/// Union `file_context` (explicitly provided paths) with paths mined from
/// `step_description`, then estimate complexity from the resulting count
/// and `total_context_lines`.
pub fn run_preflight(
    file_context: &[String],
    step_description: &str,
    total_context_lines: usize,
) -> PreflightResult {
    let mut files: BTreeSet<String> = file_context.iter().cloned().collect();
    files.extend(extract_paths_from_description(step_description));

    let target_files: Vec<String> = files.into_iter().collect();
    let complexity = estimate_complexity(target_files.len(), total_context_lines);
    let should_split = target_files.len() > 1 || complexity == Complexity::High;

    PreflightResult {
        target_files,
        complexity,
        should_split,
    }
}
