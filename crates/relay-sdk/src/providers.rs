// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use relay_model::{MockProvider, ModelProvider};

use crate::config::ThinkingLevel;

/// Builds a [`ModelProvider`] for a given model id and thinking level. The
/// thinking level is ignored by any factory whose provider doesn't support
/// extended thinking.
pub type ProviderFactory = Arc<dyn Fn(&str, ThinkingLevel) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// Maps `provider_tag` to a constructor. This core ships only the
/// network-free mock driver under `"mock"` — real providers (OpenAI,
/// Anthropic, Bedrock, ...) are the embedder's responsibility to register,
/// keeping static model metadata separate from provider construction.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<String, ProviderFactory> = HashMap::new();
        factories.insert("mock".into(), Arc::new(|_model_id, _thinking| Ok(Arc::new(MockProvider) as Arc<dyn ModelProvider>)));
        Self { factories }
    }

    /// Registers or replaces the factory for `provider_tag`.
    pub fn register(&mut self, provider_tag: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(provider_tag.into(), factory);
    }

    pub fn known_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Instantiates a provider for `provider_tag`/`model_id`. Errors if the
    /// tag was never registered.
    pub fn build(&self, provider_tag: &str, model_id: &str, thinking_level: ThinkingLevel) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let factory = self
            .factories
            .get(provider_tag)
            .ok_or_else(|| anyhow::anyhow!("no provider registered for tag '{provider_tag}'"))?;
        factory(model_id, thinking_level)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
