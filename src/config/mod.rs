//! [AMBIENT] Configuration: `missioncore.toml` loaded with `toml` +
//! `serde`, `dirs` for default paths, environment overrides for
//! secrets.
//!
//! Generalizes `core/src/config.rs` `LLMConfig`/
//! `ConfigManager` pattern (provider table, settings, env overrides,
//! save/load round trip) from per-LLM-provider tuning knobs to this
//! crate's own budgets, checkpoint directory, and command-policy
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command_policy::SerializedPolicy;
use crate::error::{CoreError, CoreResult};

/// LLM-facing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub default_model: String,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_model: "sonnet".to_string(),
            max_tokens: 4096,
        }
    }
}

/// AgenticLoop and AutonomyController budget defaults, overridable per-call but seeded from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub loop_max_iterations: u32,
    pub loop_max_total_tokens: u64,
    pub autonomy_max_iterations: u32,
    pub autonomy_max_tool_calls: u32,
    pub autonomy_max_wall_millis: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            loop_max_iterations: 25,
            loop_max_total_tokens: 200_000,
            autonomy_max_iterations: 50,
            autonomy_max_tool_calls: 200,
            autonomy_max_wall_millis: 30 * 60 * 1000,
        }
    }
}

/// Ambient process settings, mirroring `ConfigSettings`
/// (log level, cache knobs) trimmed to what this crate actually uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub log_level: String,
    pub checkpoint_dir_name: String,
    pub evidence_dir_name: String,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            checkpoint_dir_name: "checkpoints".to_string(),
            evidence_dir_name: "evidence".to_string(),
        }
    }
}

/// Root configuration, loaded from `<workspace>/missioncore.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSettings,
    pub budgets: BudgetSettings,
    pub settings: ProcessSettings,
    pub command_policy: Option<SerializedPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            budgets: BudgetSettings::default(),
            settings: ProcessSettings::default(),
            command_policy: None,
        }
    }
}

/// Loads, saves, and applies environment overrides to a [`Config`],
/// mirroring `ConfigManager`.
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Loads `<workspace_root>/missioncore.toml`, writing the default
    /// config there first if it doesn't exist yet.
    pub fn load_or_init(workspace_root: impl AsRef<Path>) -> CoreResult<Self> {
        let config_path = workspace_root.as_ref().join("missioncore.toml");
        let mut manager = Self {
            config_path,
            config: Config::default(),
        };

        if manager.config_path.exists() {
            manager.load()?;
        } else {
            manager.save()?;
        }

        manager.apply_env_overrides();
        Ok(manager)
    }

    /// Loads from an explicit path without writing a default on miss,
    /// used by tests and by callers that manage the file themselves.
    pub fn with_path(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let config_path = path.into();
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| CoreError::Parse(e.to_string()))?
        } else {
            Config::default()
        };
        Ok(Self { config_path, config })
    }

    /// Directory used for a user-level cache/config fallback, mirroring
    /// `dirs::config_dir()` in `ConfigManager::new`. Not
    /// used for the workspace config itself, only for cross-workspace
    /// defaults a caller may want to seed from.
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("missioncore"))
    }

    pub fn load(&mut self) -> CoreResult<()> {
        let content = fs::read_to_string(&self.config_path)?;
        self.config = toml::from_str(&content).map_err(|e| CoreError::Parse(e.to_string()))?;
        Ok(())
    }

    pub fn save(&self) -> CoreResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.config).map_err(|e| CoreError::Parse(e.to_string()))?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// `MISSIONCORE_*` environment variables override the loaded file,
    /// the same layering `apply_env_overrides` does for provider config
    /// elsewhere in this family of tools.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("MISSIONCORE_DEFAULT_MODEL") {
            self.config.llm.default_model = model;
        }
        if let Ok(max_tokens) = std::env::var("MISSIONCORE_MAX_TOKENS") {
            if let Ok(max_tokens) = max_tokens.parse() {
                self.config.llm.max_tokens = max_tokens;
            }
        }
        if let Ok(log_level) = std::env::var("MISSIONCORE_LOG_LEVEL") {
            self.config.settings.log_level = log_level;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// command policy loaded from config is merged over
    /// the built-in defaults (workspace over defaults), never replacing
    /// them outright.
    pub fn command_policy(&self) -> CoreResult<crate::command_policy::CommandPolicy> {
        let default_policy = crate::command_policy::CommandPolicy::default_policy();
        match &self.config.command_policy {
            None => Ok(default_policy),
            Some(serialized) => {
                let configured = crate::command_policy::CommandPolicy::from_serialized(serialized.clone())
                    .map_err(|e| CoreError::Parse(e.to_string()))?;
                Ok(default_policy.merge_over(&configured))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missioncore.toml");
        let manager = ConfigManager::with_path(&path).unwrap();
        manager.save().unwrap();

        let reloaded = ConfigManager::with_path(&path).unwrap();
        assert_eq!(reloaded.config().llm.default_model, "sonnet");
        assert_eq!(reloaded.config().budgets.loop_max_iterations, 25);
    }

    #[test]
    fn missing_file_yields_defaults_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missioncore.toml");
        let manager = ConfigManager::with_path(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(manager.config().settings.log_level, "info");
    }

    #[test]
    fn load_or_init_writes_default_file_on_first_run() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load_or_init(dir.path()).unwrap();
        assert!(manager.config_path().exists());
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missioncore.toml");
        let mut manager = ConfigManager::with_path(&path).unwrap();

        std::env::set_var("MISSIONCORE_DEFAULT_MODEL", "opus");
        manager.apply_env_overrides();
        std::env::remove_var("MISSIONCORE_DEFAULT_MODEL");

        assert_eq!(manager.config().llm.default_model, "opus");
    }

    #[test]
    fn command_policy_merges_configured_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missioncore.toml");
        let mut manager = ConfigManager::with_path(&path).unwrap();
        manager.config_mut().command_policy = Some(SerializedPolicy {
            mode: crate::command_policy::PolicyMode::Auto,
            allowlist_patterns: vec![r"^custom-tool\b".to_string()],
            blocklist_patterns: vec![],
            long_running_patterns: vec![],
            max_output_bytes_per_command: 2048,
            chunk_throttle_ms: 10,
            default_timeout_ms: 1000,
        });

        let policy = manager.command_policy().unwrap();
        let serialized = policy.serialize();
        assert!(serialized.allowlist_patterns.contains(&"^custom-tool\\b".to_string()));
        assert!(serialized.allowlist_patterns.iter().any(|p| p.contains("git")));
    }
}
