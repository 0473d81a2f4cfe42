// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_model::Usage;

/// A tagged union published to the event bus. Message and tool-call payloads
/// are carried as opaque JSON — the bus sits below the session store in the
/// dependency order and must not depend on its message tree type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AgentStart,
    AgentEnd { messages: Vec<Value>, usage: Usage },
    AgentAbort,

    MessageStart,
    MessageDelta { delta: String },
    MessageApplied { text: String },

    ThinkingStart,
    ThinkingDelta { delta: String },

    TurnEnd { message: Value, tool_calls: Vec<Value> },

    ToolExecutionStart { name: String, call_id: String, args: Value, meta: Option<Value> },
    ToolExecutionEnd { name: String, call_id: String, result: Value },

    StatusUpdate { phase: String },
    UsageUpdate { usage: Usage },

    Error { reason: String },

    CompactionStart { msg_count: usize },
    CompactionEnd { before: usize, after: usize },

    SubAgentEvent {
        parent_call_id: String,
        sub_session_id: String,
        inner_event: Box<Event>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
