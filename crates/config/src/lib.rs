//! Configuration loading, validation, and management for Holdfast.
//!
//! Loads configuration from `~/.holdfast/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.holdfast/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldfastConfig {
    /// Model id passed to the model client
    #[serde(default = "default_model")]
    pub model: String,

    /// Project root; defaults to the current directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    /// Loop limits and heuristics
    #[serde(default)]
    pub agent: AgentSettings,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolSettings,

    /// Where todo snapshots and execution histories are kept
    #[serde(default)]
    pub store: StoreSettings,
}

fn default_model() -> String {
    "gpt-4o".into()
}

/// Settings that drive the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Completion-gate failures tolerated before a caveated answer is accepted
    #[serde(default = "default_max_gate_retries")]
    pub max_gate_retries: u32,

    /// Model context window, in estimated tokens
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Tokens held back for the model's response
    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,

    /// Compress once the conversation uses this share of the usable budget
    #[serde(default = "default_compression_threshold_percent")]
    pub compression_threshold_percent: u8,

    #[serde(default = "default_stream_debounce_ms")]
    pub stream_debounce_ms: u64,

    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// Tool output longer than this is cut to head + tail
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,

    /// Leading characters of a no-tool answer compared for stall detection
    #[serde(default = "default_stall_window_chars")]
    pub stall_window_chars: usize,

    /// Shared-prefix length that makes two answers "the same"
    #[serde(default = "default_stall_prefix_chars")]
    pub stall_prefix_chars: usize,

    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    /// Outstanding-todo reminders that stay gentle
    #[serde(default = "default_todo_soft_retries")]
    pub todo_soft_retries: u32,

    /// Outstanding-todo reminders before deferring to the completion gate
    #[serde(default = "default_todo_hard_retries")]
    pub todo_hard_retries: u32,

    /// Lint/check command the gate expects to see run after edits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_command: Option<String>,

    /// Skip approval prompts for medium/high risk tools
    #[serde(default)]
    pub auto_approve: bool,

    /// Iteration cap for sub-agents spawned by the `task` tool
    #[serde(default = "default_sub_agent_max_iterations")]
    pub sub_agent_max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    60
}
fn default_max_gate_retries() -> u32 {
    5
}
fn default_token_budget() -> usize {
    128_000
}
fn default_response_reserve() -> usize {
    8_192
}
fn default_compression_threshold_percent() -> u8 {
    60
}
fn default_stream_debounce_ms() -> u64 {
    100
}
fn default_approval_timeout_secs() -> u64 {
    300
}
fn default_max_tool_output_chars() -> usize {
    30_000
}
fn default_stall_window_chars() -> usize {
    200
}
fn default_stall_prefix_chars() -> usize {
    100
}
fn default_stall_threshold() -> u32 {
    2
}
fn default_todo_soft_retries() -> u32 {
    3
}
fn default_todo_hard_retries() -> u32 {
    6
}
fn default_sub_agent_max_iterations() -> u32 {
    20
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_gate_retries: default_max_gate_retries(),
            token_budget: default_token_budget(),
            response_reserve: default_response_reserve(),
            compression_threshold_percent: default_compression_threshold_percent(),
            stream_debounce_ms: default_stream_debounce_ms(),
            approval_timeout_secs: default_approval_timeout_secs(),
            max_tool_output_chars: default_max_tool_output_chars(),
            stall_window_chars: default_stall_window_chars(),
            stall_prefix_chars: default_stall_prefix_chars(),
            stall_threshold: default_stall_threshold(),
            todo_soft_retries: default_todo_soft_retries(),
            todo_hard_retries: default_todo_hard_retries(),
            lint_command: None,
            auto_approve: false,
            sub_agent_max_iterations: default_sub_agent_max_iterations(),
        }
    }
}

impl AgentSettings {
    /// Estimated-token cost above which the loop compresses context.
    pub fn compression_trigger_tokens(&self) -> usize {
        let usable = self.token_budget.saturating_sub(self.response_reserve);
        usable * self.compression_threshold_percent as usize / 100
    }
}

/// Settings for the built-in tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Deadline for tools that don't declare their own
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Deadline for `run_command`
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    /// Maximum matches returned by `grep_search`
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    /// Files larger than this are skipped by `grep_search`
    #[serde(default = "default_max_search_file_bytes")]
    pub max_search_file_bytes: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_shell_timeout_secs() -> u64 {
    120
}
fn default_max_search_results() -> usize {
    200
}
fn default_max_search_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            shell_timeout_secs: default_shell_timeout_secs(),
            max_search_results: default_max_search_results(),
            max_search_file_bytes: default_max_search_file_bytes(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for the file backend; defaults to `~/.holdfast/state`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            dir: None,
        }
    }
}

impl StoreSettings {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| HoldfastConfig::config_dir().join("state"))
    }
}

impl HoldfastConfig {
    /// Load configuration from the default path (~/.holdfast/config.toml).
    ///
    /// Environment variables override the file:
    /// - `HOLDFAST_MODEL`
    /// - `HOLDFAST_AUTO_APPROVE` (`1`/`true`/`yes`)
    /// - `HOLDFAST_MAX_ITERATIONS`
    /// - `HOLDFAST_PROJECT_ROOT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`, then re-validate.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("HOLDFAST_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }

        if let Some(raw) = lookup("HOLDFAST_AUTO_APPROVE") {
            self.agent.auto_approve = parse_flag(&raw).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "HOLDFAST_AUTO_APPROVE must be a boolean, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("HOLDFAST_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "HOLDFAST_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(root) = lookup("HOLDFAST_PROJECT_ROOT").filter(|r| !r.trim().is_empty()) {
            self.project_root = Some(PathBuf::from(root));
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".holdfast")
    }

    /// The configured project root, or the current directory.
    pub fn project_root(&self) -> PathBuf {
        self.project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if !(1..=100).contains(&agent.compression_threshold_percent) {
            return Err(ConfigError::ValidationError(
                "agent.compression_threshold_percent must be between 1 and 100".into(),
            ));
        }

        if agent.token_budget <= agent.response_reserve {
            return Err(ConfigError::ValidationError(
                "agent.token_budget must be greater than agent.response_reserve".into(),
            ));
        }

        if agent.max_iterations == 0 || agent.sub_agent_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "iteration limits must be > 0".into(),
            ));
        }

        if agent.approval_timeout_secs == 0 || agent.max_tool_output_chars == 0 {
            return Err(ConfigError::ValidationError(
                "agent.approval_timeout_secs and agent.max_tool_output_chars must be > 0".into(),
            ));
        }

        if agent.stall_prefix_chars == 0 || agent.stall_prefix_chars > agent.stall_window_chars {
            return Err(ConfigError::ValidationError(
                "agent.stall_prefix_chars must be in 1..=stall_window_chars".into(),
            ));
        }

        if agent.todo_soft_retries > agent.todo_hard_retries {
            return Err(ConfigError::ValidationError(
                "agent.todo_soft_retries must not exceed agent.todo_hard_retries".into(),
            ));
        }

        if self.tools.default_timeout_secs == 0 || self.tools.shell_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("tool timeouts must be > 0".into()));
        }

        if self.tools.max_search_results == 0 {
            return Err(ConfigError::ValidationError(
                "tools.max_search_results must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for HoldfastConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            project_root: None,
            agent: AgentSettings::default(),
            tools: ToolSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for holdfast_core::Error {
    fn from(e: ConfigError) -> Self {
        holdfast_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = HoldfastConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 60);
        assert_eq!(config.agent.max_gate_retries, 5);
        assert_eq!(config.agent.compression_threshold_percent, 60);
        assert_eq!(config.agent.approval_timeout_secs, 300);
        assert!(!config.agent.auto_approve);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = HoldfastConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: HoldfastConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "local-coder"

[agent]
max_iterations = 25
lint_command = "cargo clippy"

[store]
backend = "memory"
"#,
        )
        .unwrap();

        let config = HoldfastConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "local-coder");
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.agent.lint_command.as_deref(), Some("cargo clippy"));
        assert_eq!(config.agent.stall_threshold, 2);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.tools.default_timeout_secs, 30);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = HoldfastConfig::default();
        config.agent.compression_threshold_percent = 0;
        assert!(config.validate().is_err());
        config.agent.compression_threshold_percent = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserve_must_fit_in_budget() {
        let mut config = HoldfastConfig::default();
        config.agent.response_reserve = config.agent.token_budget;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_iterations = ").unwrap();
        assert!(matches!(
            HoldfastConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = HoldfastConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, HoldfastConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = HoldfastConfig::default();
        config
            .apply_env(env(&[
                ("HOLDFAST_MODEL", "other-model"),
                ("HOLDFAST_AUTO_APPROVE", "yes"),
                ("HOLDFAST_MAX_ITERATIONS", "12"),
                ("HOLDFAST_PROJECT_ROOT", "/proj"),
            ]))
            .unwrap();

        assert_eq!(config.model, "other-model");
        assert!(config.agent.auto_approve);
        assert_eq!(config.agent.max_iterations, 12);
        assert_eq!(config.project_root(), PathBuf::from("/proj"));
    }

    #[test]
    fn bad_env_values_rejected() {
        let mut config = HoldfastConfig::default();
        assert!(config.apply_env(env(&[("HOLDFAST_AUTO_APPROVE", "maybe")])).is_err());
        assert!(config.apply_env(env(&[("HOLDFAST_MAX_ITERATIONS", "0")])).is_err());
        assert!(config.apply_env(env(&[("HOLDFAST_MAX_ITERATIONS", "lots")])).is_err());
    }

    #[test]
    fn compression_trigger_uses_usable_budget() {
        let agent = AgentSettings {
            token_budget: 10_000,
            response_reserve: 2_000,
            compression_threshold_percent: 50,
            ..AgentSettings::default()
        };
        assert_eq!(agent.compression_trigger_tokens(), 4_000);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = HoldfastConfig::default_toml();
        assert!(toml_str.contains("max_iterations = 60"));
        assert!(toml_str.contains("[store]"));
    }
}
