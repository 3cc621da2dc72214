//! Diff Validator: rejects unsafe operations by code.

use serde::Serialize;

use crate::diff::parser::{parse_unified_diff, ParseError};
use crate::diff::types::ParsedDiff;

/// Validator error codes. When a safety rule is relaxed
/// (e.g. creates allowed), the matching code is never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorErrorCode {
    ParseError,
    EmptyDiff,
    FileCreation,
    FileDeletion,
    FileRename,
    ModeChange,
    PathTraversal,
    UnknownFile,
    ShaMismatch,
    ScopeFilesExceeded,
    ScopeLinesExceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: ValidatorErrorCode,
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            issues: vec![],
        }
    }

    pub fn has_code(&self, code: ValidatorErrorCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Rules the validator enforces; defaults are maximally restrictive so
/// relaxing a rule is an explicit opt-in.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allow_create: bool,
    pub allow_delete: bool,
    pub allow_rename: bool,
    pub allow_mode_change: bool,
    /// Paths the diff is contextually allowed to touch; `None` disables
    /// the allowlist check entirely.
    pub allowed_paths: Option<Vec<String>>,
    pub max_files: Option<usize>,
    pub max_changed_lines: Option<usize>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allow_create: false,
            allow_delete: false,
            allow_rename: false,
            allow_mode_change: false,
            allowed_paths: None,
            max_files: None,
            max_changed_lines: None,
        }
    }
}

fn is_path_traversal(path: &str) -> bool {
    path.starts_with('/') || path.split('/').any(|seg| seg == "..")
}

/// Parse then validate a unified diff against `policy`.
pub fn validate_diff(input: &str, policy: &ValidationPolicy) -> ValidationResult {
    let parsed = match parse_unified_diff(input) {
        Ok(p) => p,
        Err(ParseError::MalformedFileHeader(m))
        | Err(ParseError::MalformedHunkHeader(m))
        | Err(ParseError::LineOutsideHunk(m)) => {
            return ValidationResult {
                valid: false,
                issues: vec![ValidationIssue {
                    code: ValidatorErrorCode::ParseError,
                    path: None,
                    message: m,
                }],
            };
        }
    };

    validate_parsed(&parsed, policy)
}

pub fn validate_parsed(parsed: &ParsedDiff, policy: &ValidationPolicy) -> ValidationResult {
    let mut issues = Vec::new();

    if parsed.is_empty() {
        issues.push(ValidationIssue {
            code: ValidatorErrorCode::EmptyDiff,
            path: None,
            message: "diff contains no file entries".to_string(),
        });
        return ValidationResult {
            valid: false,
            issues,
        };
    }

    let mut total_changed_lines = 0usize;

    for file in &parsed.files {
        let path = file.effective_path().map(|s| s.to_string());

        for candidate in [&file.old_path, &file.new_path] {
            if let Some(p) = candidate {
                if is_path_traversal(p) {
                    issues.push(ValidationIssue {
                        code: ValidatorErrorCode::PathTraversal,
                        path: Some(p.clone()),
                        message: format!("path '{p}' escapes the workspace root"),
                    });
                }
            }
        }

        if file.is_create && !policy.allow_create {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::FileCreation,
                path: path.clone(),
                message: "file creation is not permitted".to_string(),
            });
        }
        if file.is_delete && !policy.allow_delete {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::FileDeletion,
                path: path.clone(),
                message: "file deletion is not permitted".to_string(),
            });
        }
        if file.is_rename && !policy.allow_rename {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::FileRename,
                path: path.clone(),
                message: "file rename is not permitted".to_string(),
            });
        }
        if file.has_mode_change && !policy.allow_mode_change {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::ModeChange,
                path: path.clone(),
                message: "file mode change is not permitted".to_string(),
            });
        }

        if let Some(allowed) = &policy.allowed_paths {
            if let Some(p) = &path {
                if !allowed.iter().any(|a| a == p) {
                    issues.push(ValidationIssue {
                        code: ValidatorErrorCode::UnknownFile,
                        path: Some(p.clone()),
                        message: format!("path '{p}' is not in the contextual allowlist"),
                    });
                }
            }
        }

        total_changed_lines += file.additions + file.deletions;
    }

    if let Some(max_files) = policy.max_files {
        if parsed.files.len() > max_files {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::ScopeFilesExceeded,
                path: None,
                message: format!(
                    "diff touches {} files, exceeding the scope limit of {max_files}",
                    parsed.files.len()
                ),
            });
        }
    }

    if let Some(max_lines) = policy.max_changed_lines {
        if total_changed_lines > max_lines {
            issues.push(ValidationIssue {
                code: ValidatorErrorCode::ScopeLinesExceeded,
                path: None,
                message: format!(
                    "diff changes {total_changed_lines} lines, exceeding the scope limit of {max_lines}"
                ),
            });
        }
    }

    ValidationResult {
        valid: issues.is_empty(),
        issues,
    }
}

/// Check a single path's expected `base_sha` against the sha observed on
/// disk at read time.
pub fn check_sha(path: &str, expected: &str, observed: &str) -> Option<ValidationIssue> {
    if expected != observed {
        Some(ValidationIssue {
            code: ValidatorErrorCode::ShaMismatch,
            path: Some(path.to_string()),
            message: format!("base_sha mismatch for '{path}'"),
        })
    } else {
        None
    }
}
