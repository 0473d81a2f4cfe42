// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Echoes its `text` argument back. Used to exercise the runner's happy
/// path without touching the filesystem or a shell.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the given text back unchanged."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string", "description": "Text to echo back" } },
            "required": ["text"],
            "additionalProperties": false,
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall, _context: &ToolContext) -> ToolOutput {
        match call.args.get("text").and_then(Value::as_str) {
            Some(text) => ToolOutput::ok(&call.call_id, text),
            None => ToolOutput::err(&call.call_id, "missing 'text' argument"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("/tmp", "sess-1", Arc::new(relay_config::ToolsConfig::default()))
    }

    #[tokio::test]
    async fn echoes_text_back() {
        let call = ToolCall { call_id: "1".into(), name: "echo".into(), args: json!({"text": "hi"}) };
        let out = EchoTool.execute(&call, &ctx()).await;
        assert!(!out.is_error);
        assert_eq!(out.output, "hi");
    }

    #[tokio::test]
    async fn missing_text_is_error() {
        let call = ToolCall { call_id: "1".into(), name: "echo".into(), args: json!({}) };
        let out = EchoTool.execute(&call, &ctx()).await;
        assert!(out.is_error);
    }
}
