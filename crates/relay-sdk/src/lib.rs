// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod config;
pub mod providers;
pub mod sdk;

pub use config::{FeatureToggle, FeaturesConfig, ModelSelector, SessionConfig, ThinkingLevel};
pub use providers::{ProviderFactory, ProviderRegistry};
pub use sdk::RelaySdk;
