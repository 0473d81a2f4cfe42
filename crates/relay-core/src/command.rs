// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use relay_model::ModelProvider;
use relay_session::{Message, TreeNode};
use tokio::sync::oneshot;

use crate::state::AgentStateSnapshot;

/// Messages the agent loop's mailbox accepts. Every external operation on a
/// running session goes through this channel — the worker task is the only
/// thing that ever touches the live agent state.
pub enum AgentCommand {
    /// Fire-and-forget prompt. Treated identically to a steer when the
    /// agent isn't idle.
    Prompt { text: String },
    /// Equivalent to `Prompt` when idle; queued (FIFO, with other steers)
    /// otherwise.
    Steer { text: String },
    /// Cancel the in-flight stream and any dispatched tool tasks, return to
    /// idle, keep already-appended messages.
    Abort,
    GetState { reply: oneshot::Sender<AgentStateSnapshot> },
    SetModel { model: Arc<dyn ModelProvider>, reply: oneshot::Sender<()> },
    /// Session tree operations — forwarded to the worker's `SessionStore`
    /// since it's never shared outside the worker task.
    Save { path: PathBuf, reply: oneshot::Sender<anyhow::Result<()>> },
    Branch { message_id: String, reply: oneshot::Sender<anyhow::Result<()>> },
    GetPath { reply: oneshot::Sender<Vec<Message>> },
    GetTree { reply: oneshot::Sender<HashMap<String, TreeNode>> },
    /// Forces a compaction pass regardless of the context-window ratio.
    /// Only honored while idle — rejected if a stream is in flight, since
    /// compaction only ever runs at a turn boundary.
    ForceCompact { reply: oneshot::Sender<anyhow::Result<bool>> },
    /// Terminate the worker task entirely.
    Stop,
}
