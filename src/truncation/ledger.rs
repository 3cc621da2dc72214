//! EditAttemptLedger: per-file retry bookkeeping for
//! split-by-file recovery.
//!
//! Grounded on `execution_engine/circuit_breaker.rs`'s per-key
//! (`HashMap<String, ToolCircuitBreaker>`) failure tracking, generalized
//! from a pass/fail counter to a ledger that also remembers each file's
//! last successful single-file edit for combination.

use std::collections::BTreeMap;

use crate::llm_edit::FileAction;

/// One file's outcome from a single-file L2 LLM call.
#[derive(Debug, Clone)]
pub enum SingleFileOutcome {
    Changed {
        action: FileAction,
        unified_diff: Option<String>,
        new_content: Option<String>,
        base_sha: Option<String>,
    },
    NoChanges,
}

#[derive(Debug, Clone, Default)]
struct FileAttemptState {
    attempts: u32,
    last_error: Option<String>,
    resolved: Option<SingleFileOutcome>,
}

/// Tracks retry attempts and resolution for each file in a split-by-file
/// recovery run. Deterministic: the same sequence of `record_attempt`
/// calls always yields the same `combine()` output.
#[derive(Debug)]
pub struct EditAttemptLedger {
    max_retries_per_file: u32,
    files: BTreeMap<String, FileAttemptState>,
}

impl EditAttemptLedger {
    pub fn new(target_files: &[String], max_retries_per_file: u32) -> Self {
        Self {
            max_retries_per_file,
            files: target_files
                .iter()
                .map(|f| (f.clone(), FileAttemptState::default()))
                .collect(),
        }
    }

    /// Files that have neither resolved nor exhausted their retry budget.
    pub fn pending_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, state)| state.resolved.is_none() && state.attempts < self.max_retries_per_file)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn record_success(&mut self, file: &str, outcome: SingleFileOutcome) {
        if let Some(state) = self.files.get_mut(file) {
            state.attempts += 1;
            state.resolved = Some(outcome);
            state.last_error = None;
        }
    }

    pub fn record_failure(&mut self, file: &str, error: impl Into<String>) {
        if let Some(state) = self.files.get_mut(file) {
            state.attempts += 1;
            state.last_error = Some(error.into());
        }
    }

    /// True once every file is resolved or has exhausted its retries.
    pub fn is_settled(&self) -> bool {
        self.files
            .values()
            .all(|s| s.resolved.is_some() || s.attempts >= self.max_retries_per_file)
    }

    /// True once every file resolved successfully.
    pub fn all_resolved(&self) -> bool {
        self.files.values().all(|s| s.resolved.is_some())
    }

    /// Files that exhausted retries without resolving, with their last
    /// recorded error.
    pub fn unrecovered_files(&self) -> Vec<(String, String)> {
        self.files
            .iter()
            .filter(|(_, s)| s.resolved.is_none() && s.attempts >= self.max_retries_per_file)
            .map(|(path, s)| {
                (
                    path.clone(),
                    s.last_error.clone().unwrap_or_else(|| "no successful attempt".to_string()),
                )
            })
            .collect()
    }

    pub(crate) fn touched(&self) -> Vec<(&str, &SingleFileOutcome)> {
        self.files
            .iter()
            .filter_map(|(path, s)| s.resolved.as_ref().map(|o| (path.as_str(), o)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_files_shrinks_as_attempts_resolve() {
        let mut ledger = EditAttemptLedger::new(&["a.rs".to_string(), "b.rs".to_string()], 2);
        assert_eq!(ledger.pending_files().len(), 2);
        ledger.record_success("a.rs", SingleFileOutcome::NoChanges);
        assert_eq!(ledger.pending_files(), vec!["b.rs".to_string()]);
    }

    #[test]
    fn exhausting_retries_marks_file_unrecovered() {
        let mut ledger = EditAttemptLedger::new(&["a.rs".to_string()], 2);
        ledger.record_failure("a.rs", "boom 1");
        ledger.record_failure("a.rs", "boom 2");
        assert!(ledger.is_settled());
        assert!(!ledger.all_resolved());
        let unrecovered = ledger.unrecovered_files();
        assert_eq!(unrecovered.len(), 1);
        assert_eq!(unrecovered[0].1, "boom 2");
    }

    #[test]
    fn settled_requires_all_files_done() {
        let mut ledger = EditAttemptLedger::new(&["a.rs".to_string(), "b.rs".to_string()], 1);
        ledger.record_success("a.rs", SingleFileOutcome::NoChanges);
        assert!(!ledger.is_settled());
        ledger.record_failure("b.rs", "nope");
        assert!(ledger.is_settled());
    }
}
