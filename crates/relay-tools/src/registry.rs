// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// A tool schema handed to the model as part of a completion request.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

// SAFETY: HashMap<String, Arc<dyn Tool>> is Sync because Arc<T: Send + Sync>
// is Sync and tools are immutable after registration — every method here
// takes &self.
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas for every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema { name: t.name().to_string(), description: t.description().to_string(), parameters: t.parameters_schema() })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a single call directly, bypassing the concurrent runner.
    /// Mainly useful for tests; production dispatch goes through
    /// [`crate::runner::ToolRunner`].
    pub async fn execute(&self, call: &ToolCall, context: &ToolContext) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call, context).await,
            None => ToolOutput::err(&call.call_id, "Tool not found"),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
