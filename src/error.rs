//! Shared error taxonomy.
//!
//! Low-level failures are captured inside the owning component and
//! surfaced as a structured result; they cross a subsystem boundary as a
//! `CoreError` rather than as an implementation-specific exception.
//! Subsystem-local error enums (`diff::ValidatorError`,
//! `checkpoint::CheckpointError`, ...) implement `From<X> for CoreError`.

use thiserror::Error;

/// One shared taxonomy of failure kinds crossing all subsystems.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("parse_error: {0}")]
    Parse(String),

    #[error("schema_error: {0}")]
    Schema(String),

    #[error("validation_error: {0}")]
    Validation(String),

    #[error("safety_violation: {0}")]
    SafetyViolation(String),

    #[error("sha_mismatch: expected {expected}, found {found} for {path}")]
    ShaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("truncation: {0}")]
    Truncation(String),

    #[error("split_failed: {0}")]
    SplitFailed(String),

    #[error("budget_exhausted: {0}")]
    BudgetExhausted(String),

    #[error("mode_violation: {0}")]
    ModeViolation(String),

    #[error("llm_error: {0}")]
    LlmError(String),

    #[error("checkpoint_not_found: {0}")]
    CheckpointNotFound(String),

    #[error("persistence_error: {0}")]
    PersistenceError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// The error "kind" tag as used in event payloads and log fields —
    /// stable across `Display` message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Parse(_) => "parse_error",
            CoreError::Schema(_) => "schema_error",
            CoreError::Validation(_) => "validation_error",
            CoreError::SafetyViolation(_) => "safety_violation",
            CoreError::ShaMismatch { .. } => "sha_mismatch",
            CoreError::Truncation(_) => "truncation",
            CoreError::SplitFailed(_) => "split_failed",
            CoreError::BudgetExhausted(_) => "budget_exhausted",
            CoreError::ModeViolation(_) => "mode_violation",
            CoreError::LlmError(_) => "llm_error",
            CoreError::CheckpointNotFound(_) => "checkpoint_not_found",
            CoreError::PersistenceError(_) => "persistence_error",
            CoreError::Io(_) => "io_error",
            CoreError::Json(_) => "json_error",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
