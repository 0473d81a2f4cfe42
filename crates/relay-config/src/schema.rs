// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Root configuration, merged from the layered YAML search path in
/// [`crate::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Directory holding saved sessions, logs, and settings (`§6` persistent
    /// state layout). Defaults to `~/.local/share/relay` at load time when
    /// left unset in every config layer.
    pub data_dir: Option<String>,
}

impl Config {
    /// Resolves `data_dir` to an absolute path, expanding `~` and
    /// environment variables. Falls back to the platform data directory
    /// when unset or unexpandable.
    pub fn resolved_data_dir(&self) -> std::path::PathBuf {
        match &self.data_dir {
            Some(raw) => match shellexpand::full(raw) {
                Ok(expanded) => std::path::PathBuf::from(expanded.into_owned()),
                Err(_) => std::path::PathBuf::from(raw),
            },
            None => dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("relay"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "mock" is always available; other values name a
    /// provider registered by the embedder at startup.
    pub provider: String,
    /// Model name forwarded to the provider.
    pub name: String,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            name: "gpt-4o".to_string(),
            api_key_env: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Compaction strategy selector (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Structured checkpoint: goals / decisions / files / pending items.
    #[default]
    Structured,
    /// Free-form narrative summary.
    Narrative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on tool-call rounds per turn before the agent is forced to
    /// wrap up with a tool-free summary (§4.5).
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Fraction of the context window that triggers auto-compaction (§4.5).
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Reserve subtracted from `compaction_threshold` so compaction fires
    /// before the hard ceiling, leaving headroom for schema/tool overhead.
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    /// Approximate tokens of the most recent conversation to always keep
    /// verbatim (never summarized) during compaction.
    #[serde(default = "default_keep_recent_tokens")]
    pub compaction_keep_recent_tokens: usize,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Per-tool-result truncation cap, in approximate tokens.
    #[serde(default = "default_tool_result_cap")]
    pub tool_result_token_cap: usize,
    /// Retry/backoff tuning (§4.5 retry policy).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_backoff_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Stream watchdog idle timeout, in milliseconds.
    #[serde(default = "default_watchdog_ms")]
    pub stream_watchdog_ms: u64,
    /// Custom system prompt override.
    pub system_prompt: Option<String>,
    #[serde(default = "default_true")]
    pub compaction_enabled: bool,
}

fn default_max_tool_rounds() -> u32 {
    50
}
fn default_compaction_threshold() -> f32 {
    0.8
}
fn default_compaction_overhead_reserve() -> f32 {
    0.05
}
fn default_keep_recent_tokens() -> usize {
    20_000
}
fn default_tool_result_cap() -> usize {
    4_000
}
fn default_retry_base_ms() -> u64 {
    2_000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_watchdog_ms() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            compaction_threshold: default_compaction_threshold(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            compaction_keep_recent_tokens: default_keep_recent_tokens(),
            compaction_strategy: CompactionStrategy::default(),
            tool_result_token_cap: default_tool_result_cap(),
            retry_base_backoff_ms: default_retry_base_ms(),
            retry_max_backoff_ms: default_retry_max_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            stream_watchdog_ms: default_watchdog_ms(),
            system_prompt: None,
            compaction_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Shell-glob patterns auto-approved without asking.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Shell-glob patterns always denied.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Per-tool-call timeout, in seconds. `0` means no timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["cat *".into(), "ls *".into(), "ls".into()],
            deny_patterns: vec!["rm -rf /*".into()],
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcConfig {
    /// When true, the CLI starts the JSON-RPC stdio server instead of the
    /// line-prompt loop.
    #[serde(default)]
    pub enabled: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_config_has_sane_retry_backoff() {
        let c = AgentConfig::default();
        assert!(c.retry_base_backoff_ms < c.retry_max_backoff_ms);
        assert!(c.retry_max_attempts > 0);
    }

    #[test]
    fn default_compaction_threshold_minus_reserve_is_positive() {
        let c = AgentConfig::default();
        assert!(c.compaction_threshold - c.compaction_overhead_reserve > 0.0);
    }

    #[test]
    fn default_tools_config_auto_approves_read_only_commands() {
        let c = ToolsConfig::default();
        assert!(c.auto_approve_patterns.iter().any(|p| p == "ls"));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let c = Config::default();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.model.provider, c.model.provider);
        assert_eq!(back.agent.max_tool_rounds, c.agent.max_tool_rounds);
    }

    #[test]
    fn resolved_data_dir_expands_tilde() {
        let c = Config { data_dir: Some("~/relay-data".to_string()), ..Default::default() };
        let resolved = c.resolved_data_dir();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.to_string_lossy().ends_with("relay-data"));
    }

    #[test]
    fn resolved_data_dir_falls_back_when_unset() {
        let c = Config::default();
        assert!(c.resolved_data_dir().ends_with("relay"));
    }

    #[test]
    fn compaction_strategy_is_a_valid_clap_value_enum() {
        use clap::ValueEnum;
        let values = CompactionStrategy::value_variants();
        assert_eq!(values.len(), 2);
    }
}
