// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use relay_model::{ToolCallWire, Usage};
use serde::Serialize;

/// Where the agent loop currently is. `idle` accepts new prompts; `running`
/// covers everything between a stream ending and either the next stream or
/// idle (tool dispatch, steer drain); `streaming` means a provider request
/// is actively being consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Streaming,
}

/// A tool call still accumulating deltas. Keyed by `call_index` during
/// streaming (two parallel calls can interleave argument deltas), not by
/// `call_id` — the id itself may arrive before or after the first delta.
#[derive(Debug, Default, Clone)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    pub args_buf: String,
    /// Set directly by `tool_call_done`, which carries already-parsed
    /// arguments — preferred over re-parsing `args_buf` when present.
    pub arguments: Option<serde_json::Value>,
}

impl PendingToolCall {
    pub fn finish(self) -> ToolCallWire {
        let arguments = self
            .arguments
            .unwrap_or_else(|| serde_json::from_str(&self.args_buf).unwrap_or_else(|_| serde_json::json!({})));
        ToolCallWire { call_id: self.call_id, name: self.name, arguments }
    }
}

/// A point-in-time snapshot of agent state, safe to hand to a tool or a
/// sub-agent spawn without the tool ever reaching back into the live
/// worker — the worker is blocked awaiting tool results while tools run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStateSnapshot {
    pub session_id: String,
    pub status: AgentStatus,
    pub message_count: usize,
    pub token_usage: Usage,
    pub last_prompt_tokens: u32,
    pub working_dir: String,
    pub system_prompt: String,
}
