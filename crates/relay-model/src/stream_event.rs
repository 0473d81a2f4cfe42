// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Usage;

/// A normalized event emitted while consuming a provider's streaming
/// response. Providers speak wildly different wire formats (SSE deltas,
/// chunked JSON, etc); every adapter is responsible for producing this
/// shape so the agent loop never inspects wire JSON directly.
///
/// Tool-call accumulation keys on `call_index`, not arrival order — two
/// tool calls can interleave their argument deltas on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextStart { meta: Option<Value> },
    TextDelta { text: String },
    TextDone { text: String },

    ThinkingStart { meta: Option<Value> },
    ThinkingDelta { text: String },

    ToolCallStart {
        call_id: String,
        call_index: u32,
        name: String,
    },
    ToolCallDelta {
        call_index: u32,
        delta: String,
    },
    ToolCallDone {
        call_id: String,
        arguments: Value,
    },

    ResponseDone { usage: Usage },
    Usage { usage: Usage },

    Error { reason: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
