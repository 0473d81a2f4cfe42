// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use relay_model::ToolCallWire;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

/// One node in a session's branching message tree.
///
/// An assistant message either carries `content`, `tool_calls`, or both; it
/// never carries `call_id`. A `ToolResult` message must reference an existing
/// `call_id` from a sibling/ancestor assistant message's `tool_calls` — the
/// tree itself doesn't enforce this, callers (the agent loop) do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub parent_id: Option<String>,
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallWire>>,
    /// Present on `ToolResult` messages — the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Persisted reasoning trace, when the provider exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Wall-clock time the node was appended, for session listings and
    /// transcript exports — not used by any tree or compaction logic.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(id: impl Into<String>, parent_id: Option<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            parent_id,
            role,
            content: None,
            tool_calls: None,
            call_id: None,
            name: None,
            is_error: false,
            thinking: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallWire>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn mark_error(mut self) -> Self {
        self.is_error = true;
        self
    }

    /// Approximate token count used for context management (4 chars/token).
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.as_deref().map(str::len).unwrap_or(0);
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len() + c.arguments.to_string().len();
            }
        }
        if let Some(t) = &self.thinking {
            chars += t.len();
        }
        (chars / 4).max(1)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
