// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal static metadata for known models: context window and max output
//! tokens, used by the agent loop's compaction trigger and retry classifier.

use serde::{Deserialize, Serialize};

/// Metadata for a single model/provider combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
}

fn builtin_entries() -> Vec<ModelCatalogEntry> {
    vec![
        ModelCatalogEntry {
            id: "mock-model".into(),
            provider: "mock".into(),
            context_window: 128_000,
            max_output_tokens: 8_192,
        },
        ModelCatalogEntry {
            id: "scripted-mock-model".into(),
            provider: "scripted-mock".into(),
            context_window: 128_000,
            max_output_tokens: 8_192,
        },
    ]
}

/// Look up a model by provider and id. Returns `None` if not found in the
/// built-in catalog — callers fall back to a configured default in that case.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    builtin_entries()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

/// Context window for a model, falling back to `default` when unknown.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.context_window).unwrap_or(default)
}

/// Max output tokens for a model, falling back to `default` when unknown.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.max_output_tokens).unwrap_or(default)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_model_is_in_catalog() {
        let entry = lookup("mock", "mock-model").expect("mock-model must be catalogued");
        assert!(entry.context_window > 0);
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("mock", "nonexistent-xyz").is_none());
    }

    #[test]
    fn context_window_fallback_used_when_unknown() {
        assert_eq!(context_window("openai", "no-such-model", 4096), 4096);
    }
}
