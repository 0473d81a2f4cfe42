// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How much of a provider's extended-thinking budget to request, when the
/// provider behind `model.provider_tag` supports it. Providers that don't
/// simply ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

/// Selects which provider and model a session talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelector {
    /// Key into the SDK's [`crate::providers::ProviderRegistry`].
    pub provider_tag: String,
    pub model_id: String,
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self { provider_tag: "mock".into(), model_id: "mock-model".into(), thinking_level: ThinkingLevel::default() }
    }
}

/// One optional feature area, with an enabled flag plus free-form options an
/// embedder can pass through without the SDK needing to know their shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureToggle {
    pub enabled: bool,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Optional feature areas a session can turn on. Only `sub_agents` currently
/// changes anything the core does (it adds `spawn_sub_agent` to the
/// session's tool registry) — `context`, `skills`, and `mcp` are named here
/// for API compatibility with embedders that set them, but this core has no
/// behavior wired to them; `debug` controls nothing beyond log verbosity,
/// which is already governed by `RUST_LOG`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub sub_agents: FeatureToggle,
    #[serde(default)]
    pub context: FeatureToggle,
    #[serde(default)]
    pub skills: FeatureToggle,
    #[serde(default)]
    pub mcp: FeatureToggle,
    #[serde(default)]
    pub debug: FeatureToggle,
}

/// Full configuration for `RelaySdk::start_session` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub working_dir: String,
    #[serde(default)]
    pub model: ModelSelector,
    #[serde(default)]
    pub system_prompt: String,
    /// Names of built-in tools to enable for this session, looked up in the
    /// SDK's shared tool registry. An unknown name is ignored rather than
    /// rejected, since the registry is the single source of truth for what
    /// exists.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Attaches a [`relay_session::SessionStore`] with persistence and
    /// branching. When `false` the session still runs but `save`/`load`
    /// have nothing durable to round-trip against a restart.
    #[serde(default = "default_true")]
    pub session_store_enabled: bool,
    #[serde(default)]
    pub features: FeaturesConfig,
    /// Shell used by `run_command`. Currently informational — the tool
    /// always invokes `sh -c`; kept so an embedder's config round-trips.
    #[serde(default)]
    pub shell: Option<String>,
    /// Overrides the SDK-wide data directory for this session's saved file.
    #[serde(default)]
    pub data_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            working_dir: ".".into(),
            model: ModelSelector::default(),
            system_prompt: String::new(),
            tools: Vec::new(),
            session_store_enabled: true,
            features: FeaturesConfig::default(),
            shell: None,
            data_dir: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_config_uses_the_mock_provider() {
        let c = SessionConfig::default();
        assert_eq!(c.model.provider_tag, "mock");
        assert!(c.session_store_enabled);
    }

    #[test]
    fn session_config_round_trips_through_json() {
        let mut c = SessionConfig::default();
        c.tools.push("echo".into());
        c.features.sub_agents.enabled = true;
        let json = serde_json::to_string(&c).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tools, vec!["echo".to_string()]);
        assert!(back.features.sub_agents.enabled);
    }
}
