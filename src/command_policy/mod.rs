//! CommandPolicy: safety classification of shell commands.
//!
//! Grounded on `execution_engine/safety_config.rs`'s config-struct shape
//! and `execution_engine/chat_tool_runner.rs`'s `AUTO_TOOLS`/`GATED_TOOLS`/
//! `FORBIDDEN_TOOLS` classification sets, generalized from a fixed tool
//! vocabulary to regex pattern sets over arbitrary shell command strings.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Off,
    Prompt,
    Auto,
}

/// Whether a command is expected to terminate or run indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Finite,
    LongRunning,
}

/// Plain-regex-source serialization of a `CommandPolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedPolicy {
    pub mode: PolicyMode,
    #[serde(rename = "allowlistPatterns")]
    pub allowlist_patterns: Vec<String>,
    #[serde(rename = "blocklistPatterns")]
    pub blocklist_patterns: Vec<String>,
    #[serde(rename = "longRunningPatterns")]
    pub long_running_patterns: Vec<String>,
    #[serde(rename = "maxOutputBytesPerCommand")]
    pub max_output_bytes_per_command: usize,
    #[serde(rename = "chunkThrottleMs")]
    pub chunk_throttle_ms: u64,
    #[serde(rename = "defaultTimeoutMs")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Three pattern sets plus numeric caps, gating whether a command may run
/// and how.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    pub mode: PolicyMode,
    allowlist: Vec<(String, Regex)>,
    blocklist: Vec<(String, Regex)>,
    long_running: Vec<(String, Regex)>,
    pub max_output_bytes_per_command: usize,
    pub chunk_throttle_ms: u64,
    pub default_timeout_ms: u64,
}

fn compile(patterns: &[String]) -> Result<Vec<(String, Regex)>, PolicyError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map(|re| (p.clone(), re))
                .map_err(|source| PolicyError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
        })
        .collect()
}

impl CommandPolicy {
    pub fn from_serialized(s: SerializedPolicy) -> Result<Self, PolicyError> {
        Ok(Self {
            mode: s.mode,
            allowlist: compile(&s.allowlist_patterns)?,
            blocklist: compile(&s.blocklist_patterns)?,
            long_running: compile(&s.long_running_patterns)?,
            max_output_bytes_per_command: s.max_output_bytes_per_command,
            chunk_throttle_ms: s.chunk_throttle_ms,
            default_timeout_ms: s.default_timeout_ms,
        })
    }

    pub fn serialize(&self) -> SerializedPolicy {
        SerializedPolicy {
            mode: self.mode,
            allowlist_patterns: self.allowlist.iter().map(|(s, _)| s.clone()).collect(),
            blocklist_patterns: self.blocklist.iter().map(|(s, _)| s.clone()).collect(),
            long_running_patterns: self.long_running.iter().map(|(s, _)| s.clone()).collect(),
            max_output_bytes_per_command: self.max_output_bytes_per_command,
            chunk_throttle_ms: self.chunk_throttle_ms,
            default_timeout_ms: self.default_timeout_ms,
        }
    }

    pub fn default_policy() -> Self {
        Self::from_serialized(SerializedPolicy {
            mode: PolicyMode::Prompt,
            allowlist_patterns: vec![
                r"^git (status|diff|log|show)\b".to_string(),
                r"^ls\b".to_string(),
                r"^cat\b".to_string(),
                r"^(cargo|npm|pnpm|yarn) (test|check|build)\b".to_string(),
            ],
            blocklist_patterns: vec![
                r"\brm\s+-rf\s+/".to_string(),
                r":\(\)\s*\{.*:\|:&\s*\};:".to_string(), // fork bomb
                r"\bmkfs\b".to_string(),
                r"\bdd\s+if=".to_string(),
            ],
            long_running_patterns: vec![
                r"^(npm|pnpm|yarn) (run )?(dev|start|watch)\b".to_string(),
                r"^cargo watch\b".to_string(),
                r"\btail -f\b".to_string(),
                r"^(docker compose|docker-compose) up\b".to_string(),
            ],
            max_output_bytes_per_command: 1_000_000,
            chunk_throttle_ms: 200,
            default_timeout_ms: 120_000,
        })
        .expect("built-in patterns are valid regex")
    }

    pub fn classify_command_kind(&self, cmd: &str) -> CommandKind {
        if self.long_running.iter().any(|(_, re)| re.is_match(cmd)) {
            CommandKind::LongRunning
        } else {
            CommandKind::Finite
        }
    }

    /// Blocklist always rejects; in 'auto' mode membership in the
    /// allowlist is additionally required.
    pub fn is_command_safe(&self, cmd: &str) -> bool {
        if self.blocklist.iter().any(|(_, re)| re.is_match(cmd)) {
            return false;
        }
        if self.mode == PolicyMode::Auto {
            return self.allowlist.iter().any(|(_, re)| re.is_match(cmd));
        }
        true
    }

    /// Merge `other` over `self`, unioning (not replacing) pattern
    /// arrays, keeping `other`'s mode and numeric caps.
    pub fn merge_over(&self, other: &CommandPolicy) -> CommandPolicy {
        let union = |a: &[(String, Regex)], b: &[(String, Regex)]| -> Vec<(String, Regex)> {
            let mut merged = a.to_vec();
            for (pat, re) in b {
                if !merged.iter().any(|(p, _)| p == pat) {
                    merged.push((pat.clone(), re.clone()));
                }
            }
            merged
        };

        CommandPolicy {
            mode: other.mode,
            allowlist: union(&self.allowlist, &other.allowlist),
            blocklist: union(&self.blocklist, &other.blocklist),
            long_running: union(&self.long_running, &other.long_running),
            max_output_bytes_per_command: other.max_output_bytes_per_command,
            chunk_throttle_ms: other.chunk_throttle_ms,
            default_timeout_ms: other.default_timeout_ms,
        }
    }
}
