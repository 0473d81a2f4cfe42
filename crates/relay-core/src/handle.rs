// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_bus::{Event, EventBus};
use relay_config::{AgentConfig, ToolsConfig};
use relay_model::ModelProvider;
use relay_session::{Message, SessionStore, TreeNode};
use relay_tools::ToolRegistry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::command::AgentCommand;
use crate::state::AgentStateSnapshot;
use crate::worker::Worker;

const COMMAND_MAILBOX_CAPACITY: usize = 64;

/// A handle to a running agent worker task. Cloning shares the same
/// underlying mailbox — every clone commands the same session.
#[derive(Clone)]
pub struct AgentHandle {
    session_id: String,
    tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    /// Spawns a fresh worker task and returns a handle to it.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        session_id: impl Into<String>,
        store: SessionStore,
        persist_path: Option<PathBuf>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        bus: Arc<EventBus>,
        config: Arc<AgentConfig>,
        tools_config: Arc<ToolsConfig>,
        working_dir: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self::spawn_monitored(session_id, store, persist_path, tools, model, bus, config, tools_config, working_dir, system_prompt).0
    }

    /// Like [`Self::spawn`], but also returns the worker task's
    /// `JoinHandle` so a supervisor can detect a crash (an `Err` `Ok(())`
    /// vs. `Err` distinguishes a clean `Stop`/channel-drop from a panic)
    /// and decide whether to restart.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_monitored(
        session_id: impl Into<String>,
        store: SessionStore,
        persist_path: Option<PathBuf>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        bus: Arc<EventBus>,
        config: Arc<AgentConfig>,
        tools_config: Arc<ToolsConfig>,
        working_dir: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> (Self, JoinHandle<()>) {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel(COMMAND_MAILBOX_CAPACITY);
        let worker = Worker::new(
            session_id.clone(),
            store,
            persist_path,
            tools,
            model,
            bus,
            config,
            tools_config,
            working_dir.into(),
            system_prompt.into(),
        );
        let join = tokio::spawn(worker.run(rx));
        (Self { session_id, tx }, join)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fire-and-forget prompt submission.
    pub async fn prompt(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.tx.send(AgentCommand::Prompt { text: text.into() }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))
    }

    pub async fn steer(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.tx.send(AgentCommand::Steer { text: text.into() }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))
    }

    pub async fn abort(&self) -> anyhow::Result<()> {
        self.tx.send(AgentCommand::Abort).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))
    }

    pub async fn get_state(&self) -> anyhow::Result<AgentStateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::GetState { reply }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))
    }

    pub async fn set_model(&self, model: Arc<dyn ModelProvider>) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::SetModel { model, reply }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.tx.send(AgentCommand::Stop).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))
    }

    /// Durable save of the full session tree to `path`.
    pub async fn save(&self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::Save { path: path.into(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))?
    }

    /// Moves the session's active leaf to an existing message id. Future
    /// appends fork from there; no existing message is removed.
    pub async fn branch(&self, message_id: impl Into<String>) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::Branch { message_id: message_id.into(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))?
    }

    /// Root-to-leaf walk along the session's current branch.
    pub async fn get_path(&self) -> anyhow::Result<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::GetPath { reply }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))
    }

    /// Full branching message tree, keyed by message id.
    pub async fn get_tree(&self) -> anyhow::Result<HashMap<String, TreeNode>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::GetTree { reply }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))
    }

    /// Forces a compaction pass now. Returns `Ok(false)` if nothing needed
    /// compacting, errors if a stream is currently in flight.
    pub async fn force_compact(&self) -> anyhow::Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::ForceCompact { reply }).await.map_err(|_| anyhow::anyhow!("agent worker is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent worker dropped reply"))?
    }

    /// Submits a prompt, subscribes to this session's events, and returns
    /// the accumulated assistant text once `agent_end` arrives (or an error
    /// on `agent_abort`/`error`/timeout).
    pub async fn prompt_sync(&self, text: impl Into<String>, timeout: Duration, bus: &EventBus) -> anyhow::Result<String> {
        let (handle, mut rx) = bus.subscribe(self.session_id.clone());
        self.prompt(text).await?;

        let mut accumulated = String::new();
        let result = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Some((_, Event::MessageDelta { delta })) => accumulated.push_str(&delta),
                    Some((_, Event::AgentEnd { .. })) => return Ok(accumulated.clone()),
                    Some((_, Event::AgentAbort)) => return Err(anyhow::anyhow!("aborted")),
                    Some((_, Event::Error { reason })) => return Err(anyhow::anyhow!(reason)),
                    Some(_) => continue,
                    None => return Err(anyhow::anyhow!("event bus closed")),
                }
            }
        })
        .await;

        bus.unsubscribe(handle);
        result.map_err(|_| anyhow::anyhow!("prompt_sync timed out"))?
    }
}
