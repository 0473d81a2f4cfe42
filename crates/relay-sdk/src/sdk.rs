// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_bus::{Delivery, EventBus, SubscriptionHandle};
use relay_config::Config;
use relay_core::{AgentHandle, AgentStateSnapshot, SpawnSubAgentTool};
use relay_session::{Message, SessionStore, TreeNode};
use relay_supervisor::RootSupervisor;
use relay_tools::{EchoTool, RunCommandTool, ToolRegistry};
use tracing::warn;

use crate::config::SessionConfig;
use crate::providers::ProviderRegistry;

fn build_named_tools(names: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in names {
        match name.as_str() {
            "echo" => registry.register(EchoTool),
            "run_command" => registry.register(RunCommandTool),
            other => warn!(tool = other, "unknown tool name in session config, skipping"),
        }
    }
    registry
}

/// Thin facade over the supervision tree — the surface a CLI, an RPC
/// server, or an embedding application actually calls (spec §6's public
/// agent API). Nothing downstream of here ever constructs an
/// [`AgentHandle`] or a [`RootSupervisor`] directly.
pub struct RelaySdk {
    supervisor: Arc<RootSupervisor>,
    providers: ProviderRegistry,
    config: Arc<Config>,
}

impl RelaySdk {
    pub fn new(config: Arc<Config>, providers: ProviderRegistry) -> Self {
        Self { supervisor: Arc::new(RootSupervisor::new(Arc::new(EventBus::new()))), providers, config }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.supervisor.bus()
    }

    async fn handle_or_err(&self, session_id: &str) -> anyhow::Result<AgentHandle> {
        self.supervisor.get_handle(session_id).await.ok_or_else(|| anyhow::anyhow!("unknown session: {session_id}"))
    }

    /// Starts a new session subtree. Replaces any existing subtree with the
    /// same id. If `session_store_enabled` and a saved file already exists
    /// at the resolved path, the session resumes from it.
    pub async fn start_session(&self, session_id: impl Into<String>, session_config: SessionConfig) -> anyhow::Result<AgentHandle> {
        let session_id = session_id.into();
        let model = self.providers.build(&session_config.model.provider_tag, &session_config.model.model_id, session_config.model.thinking_level)?;

        let mut registry = build_named_tools(&session_config.tools);
        if session_config.features.sub_agents.enabled {
            let child_tools = Arc::new(build_named_tools(&session_config.tools));
            registry.register(SpawnSubAgentTool::new(
                model.clone(),
                child_tools,
                self.bus(),
                Arc::new(self.config.agent.clone()),
                Arc::new(self.config.tools.clone()),
                session_config.system_prompt.clone(),
            ));
        }

        let data_dir = session_config.data_dir.as_ref().map(PathBuf::from).unwrap_or_else(|| self.config.resolved_data_dir());
        let persist_path = if session_config.session_store_enabled { Some(data_dir.join("sessions").join(format!("{session_id}.json"))) } else { None };
        let store = match &persist_path {
            Some(p) if p.exists() => SessionStore::load(p),
            _ => SessionStore::new(),
        };

        let handle = self
            .supervisor
            .start_session(
                session_id,
                store,
                persist_path,
                Arc::new(registry),
                model,
                Arc::new(self.config.agent.clone()),
                Arc::new(self.config.tools.clone()),
                session_config.working_dir.clone(),
                session_config.system_prompt.clone(),
            )
            .await;
        Ok(handle)
    }

    pub async fn prompt(&self, session_id: &str, text: impl Into<String>) -> anyhow::Result<()> {
        self.handle_or_err(session_id).await?.prompt(text).await
    }

    pub async fn prompt_sync(&self, session_id: &str, text: impl Into<String>, timeout: Duration) -> anyhow::Result<String> {
        let handle = self.handle_or_err(session_id).await?;
        let bus = self.bus();
        handle.prompt_sync(text, timeout, &bus).await
    }

    pub async fn steer(&self, session_id: &str, text: impl Into<String>) -> anyhow::Result<()> {
        self.handle_or_err(session_id).await?.steer(text).await
    }

    pub async fn abort(&self, session_id: &str) -> anyhow::Result<()> {
        self.handle_or_err(session_id).await?.abort().await
    }

    pub async fn get_state(&self, session_id: &str) -> anyhow::Result<AgentStateSnapshot> {
        self.handle_or_err(session_id).await?.get_state().await
    }

    pub async fn set_model(&self, session_id: &str, provider_tag: &str, model_id: &str, thinking_level: crate::config::ThinkingLevel) -> anyhow::Result<()> {
        let model = self.providers.build(provider_tag, model_id, thinking_level)?;
        self.handle_or_err(session_id).await?.set_model(model).await
    }

    pub async fn stop_session(&self, session_id: &str) {
        self.supervisor.stop_session(session_id).await;
    }

    pub async fn save(&self, session_id: &str, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        self.handle_or_err(session_id).await?.save(path).await
    }

    pub async fn branch(&self, session_id: &str, message_id: impl Into<String>) -> anyhow::Result<()> {
        self.handle_or_err(session_id).await?.branch(message_id).await
    }

    pub async fn get_path(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        self.handle_or_err(session_id).await?.get_path().await
    }

    pub async fn get_tree(&self, session_id: &str) -> anyhow::Result<HashMap<String, TreeNode>> {
        self.handle_or_err(session_id).await?.get_tree().await
    }

    /// Backs the `session/compact` RPC method.
    pub async fn force_compact(&self, session_id: &str) -> anyhow::Result<bool> {
        self.handle_or_err(session_id).await?.force_compact().await
    }

    /// Sessions currently running as live supervised subtrees.
    pub async fn list_active_sessions(&self) -> Vec<String> {
        self.supervisor.list_sessions().await
    }

    /// Session ids with a saved file under `dir` (spec §6's
    /// `list_sessions(dir)` — distinct from [`Self::list_active_sessions`],
    /// which only reports what's running right now).
    pub fn list_saved_sessions(&self, dir: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn events_subscribe(&self, session_id: impl Into<String>) -> (SubscriptionHandle, tokio::sync::mpsc::Receiver<Delivery>) {
        self.bus().subscribe(session_id)
    }

    pub fn events_unsubscribe(&self, handle: SubscriptionHandle) {
        self.bus().unsubscribe(handle);
    }

    pub async fn shutdown_all(&self) {
        self.supervisor.shutdown_all().await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
