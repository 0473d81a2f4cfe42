// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use relay_bus::EventBus;
use relay_config::{AgentConfig, ToolsConfig};
use relay_core::AgentHandle;
use relay_model::ModelProvider;
use relay_session::SessionStore;
use relay_tools::ToolRegistry;
use tokio::sync::Mutex;

use crate::restart::RestartPolicy;
use crate::session_supervisor::SessionSupervisor;

/// Top of the supervision tree: owns the event bus registry and the
/// dynamic set of session subtrees (§4.8). Sessions are independent of one
/// another — a crash in one never touches the others.
pub struct RootSupervisor {
    bus: Arc<EventBus>,
    restart_policy: RestartPolicy,
    sessions: Mutex<HashMap<String, Arc<SessionSupervisor>>>,
}

impl RootSupervisor {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, restart_policy: RestartPolicy::default(), sessions: Mutex::new(HashMap::new()) }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Starts a new session subtree. Replaces any existing subtree with the
    /// same id after shutting it down cleanly.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_session(
        &self,
        session_id: impl Into<String>,
        store: SessionStore,
        persist_path: Option<PathBuf>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        config: Arc<AgentConfig>,
        tools_config: Arc<ToolsConfig>,
        working_dir: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> AgentHandle {
        let session_id = session_id.into();
        self.stop_session(&session_id).await;

        let sup = Arc::new(SessionSupervisor::spawn(
            session_id.clone(),
            store,
            persist_path,
            tools,
            model,
            self.bus.clone(),
            config,
            tools_config,
            working_dir,
            system_prompt,
            self.restart_policy,
        ));
        let handle = sup.handle().await;
        self.sessions.lock().await.insert(session_id, sup);
        handle
    }

    pub async fn get_handle(&self, session_id: &str) -> Option<AgentHandle> {
        let sup = self.sessions.lock().await.get(session_id).cloned()?;
        Some(sup.handle().await)
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Shuts the session subtree down in LIFO order and removes it from the
    /// registry. A no-op if the session doesn't exist.
    pub async fn stop_session(&self, session_id: &str) {
        let sup = self.sessions.lock().await.remove(session_id);
        if let Some(sup) = sup {
            sup.shutdown().await;
        }
    }

    /// Shuts down every session subtree, most-recently-started first is not
    /// guaranteed across sessions (they're independent), but within each
    /// subtree shutdown is still strictly LIFO.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop_session(&id).await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
