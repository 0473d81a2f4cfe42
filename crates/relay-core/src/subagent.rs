// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_bus::{Event, EventBus};
use relay_config::{AgentConfig, ToolsConfig};
use relay_model::ModelProvider;
use relay_session::SessionStore;
use relay_tools::policy::ApprovalPolicy;
use relay_tools::{Tool, ToolCall, ToolContext, ToolOutput, ToolRegistry};
use serde_json::{json, Value};

use crate::handle::AgentHandle;

/// The name every built-in spawn tool registers under. A child agent's tool
/// registry MUST NOT contain a tool under this name — that is what limits
/// nesting to exactly one level, structurally rather than via a counter.
pub const SPAWN_TOOL_NAME: &str = "spawn_sub_agent";

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// A tool that spawns a short-lived child agent, forwards its entire event
/// stream to the parent session as `sub_agent_event`, and returns its final
/// text. Constructed once per parent session with a tool registry that
/// already excludes this tool itself — the child inherits that registry
/// verbatim, so it can never spawn a grandchild.
pub struct SpawnSubAgentTool {
    model: Arc<dyn ModelProvider>,
    child_tools: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    config: Arc<AgentConfig>,
    tools_config: Arc<ToolsConfig>,
    default_system_prompt: String,
}

impl SpawnSubAgentTool {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        child_tools: Arc<ToolRegistry>,
        bus: Arc<EventBus>,
        config: Arc<AgentConfig>,
        tools_config: Arc<ToolsConfig>,
        default_system_prompt: impl Into<String>,
    ) -> Self {
        Self { model, child_tools, bus, config, tools_config, default_system_prompt: default_system_prompt.into() }
    }
}

#[async_trait]
impl Tool for SpawnSubAgentTool {
    fn name(&self) -> &str {
        SPAWN_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Delegates a task to a short-lived sub-agent with the same tools (minus this one) and returns its final answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "Task for the sub-agent to carry out" },
                "system_prompt": { "type": "string", "description": "Override the sub-agent's system prompt" },
            },
            "required": ["prompt"],
            "additionalProperties": false,
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> ToolOutput {
        let Some(prompt) = call.args.get("prompt").and_then(Value::as_str).map(str::to_string) else {
            return ToolOutput::err(&call.call_id, "missing 'prompt' argument");
        };
        let system_prompt = call
            .args
            .get("system_prompt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_system_prompt.clone());

        let sub_session_id = format!("sub-{}", uuid::Uuid::new_v4());
        let child = AgentHandle::spawn(
            sub_session_id.clone(),
            SessionStore::new(),
            None,
            self.child_tools.clone(),
            self.model.clone(),
            self.bus.clone(),
            self.config.clone(),
            self.tools_config.clone(),
            context.working_dir.clone(),
            system_prompt,
        );

        let (sub_handle, mut rx) = self.bus.subscribe(sub_session_id.clone());
        if let Err(e) = child.prompt(prompt).await {
            self.bus.unsubscribe(sub_handle);
            return ToolOutput::err(&call.call_id, format!("sub-agent crashed: {e}"));
        }

        let mut collected = String::new();
        let outcome = tokio::time::timeout(DEFAULT_RUN_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Some((_, event)) => {
                        if let Event::MessageDelta { delta } = &event {
                            collected.push_str(delta);
                        }
                        let is_end = matches!(event, Event::AgentEnd { .. });
                        let is_error = matches!(event, Event::Error { .. } | Event::AgentAbort);
                        self.bus.broadcast(
                            &context.session_id,
                            Event::SubAgentEvent { parent_call_id: call.call_id.clone(), sub_session_id: sub_session_id.clone(), inner_event: Box::new(event) },
                        );
                        if is_end {
                            return Ok(());
                        }
                        if is_error {
                            return Err("sub-agent reported an error".to_string());
                        }
                    }
                    None => return Err("event channel closed before agent_end".to_string()),
                }
            }
        })
        .await;

        self.bus.unsubscribe(sub_handle);
        let _ = child.stop().await;

        match outcome {
            Ok(Ok(())) => ToolOutput::ok(&call.call_id, collected),
            Ok(Err(reason)) => ToolOutput::err(&call.call_id, format!("sub-agent crashed: {reason}")),
            Err(_) => ToolOutput::err(&call.call_id, "sub-agent crashed: timed out"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_model::ScriptedMockProvider;

    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("/tmp", "parent-sess", Arc::new(ToolsConfig::default()))
    }

    #[tokio::test]
    async fn spawns_child_and_returns_its_text() {
        let model: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("child says hi"));
        let tool = SpawnSubAgentTool::new(
            model,
            Arc::new(ToolRegistry::new()),
            Arc::new(EventBus::new()),
            Arc::new(AgentConfig::default()),
            Arc::new(ToolsConfig::default()),
            "you are a sub-agent",
        );
        let call = ToolCall { call_id: "call-1".into(), name: SPAWN_TOOL_NAME.into(), args: json!({"prompt": "do the thing"}) };
        let out = tool.execute(&call, &ctx()).await;
        assert!(!out.is_error, "{}", out.output);
        assert_eq!(out.output, "child says hi");
    }

    #[tokio::test]
    async fn missing_prompt_is_error() {
        let model: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("x"));
        let tool = SpawnSubAgentTool::new(
            model,
            Arc::new(ToolRegistry::new()),
            Arc::new(EventBus::new()),
            Arc::new(AgentConfig::default()),
            Arc::new(ToolsConfig::default()),
            "sys",
        );
        let call = ToolCall { call_id: "c1".into(), name: SPAWN_TOOL_NAME.into(), args: json!({}) };
        let out = tool.execute(&call, &ctx()).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn erroring_child_surfaces_as_crash() {
        let model: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::erroring("boom"));
        let tool = SpawnSubAgentTool::new(
            model,
            Arc::new(ToolRegistry::new()),
            Arc::new(EventBus::new()),
            Arc::new(AgentConfig::default()),
            Arc::new(ToolsConfig::default()),
            "sys",
        );
        let call = ToolCall { call_id: "c1".into(), name: SPAWN_TOOL_NAME.into(), args: json!({"prompt": "go"}) };
        let out = tool.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.output.contains("sub-agent crashed"));
    }
}
