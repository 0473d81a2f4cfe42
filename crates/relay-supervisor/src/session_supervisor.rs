// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use relay_bus::{Event, EventBus};
use relay_config::{AgentConfig, ToolsConfig};
use relay_core::AgentHandle;
use relay_model::ModelProvider;
use relay_session::SessionStore;
use relay_tools::ToolRegistry;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::restart::{RestartPolicy, RestartTracker};

/// Everything needed to (re)spawn a session's agent loop, held so a crash
/// can be repaired without the caller having to remember the session's
/// construction arguments.
struct SpawnArgs {
    persist_path: Option<PathBuf>,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    bus: Arc<EventBus>,
    config: Arc<AgentConfig>,
    tools_config: Arc<ToolsConfig>,
    working_dir: String,
    system_prompt: String,
}

/// One session's subtree (§4.8): owns the agent loop process and restarts
/// it, forward-only, on a crash. Tool tasks and sub-agent spawns are
/// isolated beneath the agent loop already (the runner never escalates a
/// tool panic, and a sub-agent crash is surfaced as a tool error) so the
/// only failure this level ever sees is the agent loop task itself dying.
pub struct SessionSupervisor {
    session_id: String,
    active: Arc<RwLock<AgentHandle>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSupervisor {
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
        restart_policy: RestartPolicy,
    ) -> Self {
        let session_id = session_id.into();
        let args = SpawnArgs {
            persist_path,
            tools,
            model,
            bus,
            config,
            tools_config,
            working_dir: working_dir.into(),
            system_prompt: system_prompt.into(),
        };

        let (handle, join) = AgentHandle::spawn_monitored(
            session_id.clone(),
            store,
            args.persist_path.clone(),
            args.tools.clone(),
            args.model.clone(),
            args.bus.clone(),
            args.config.clone(),
            args.tools_config.clone(),
            args.working_dir.clone(),
            args.system_prompt.clone(),
        );
        let active = Arc::new(RwLock::new(handle));
        let monitor = tokio::spawn(supervise(session_id.clone(), active.clone(), join, args, restart_policy));

        Self { session_id, active, monitor: Mutex::new(Some(monitor)) }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The currently active agent handle. A restart between this call and
    /// the caller's next use is possible but rare; callers that need strict
    /// continuity should re-fetch immediately before each command.
    pub async fn handle(&self) -> AgentHandle {
        self.active.read().await.clone()
    }

    /// Stops the agent loop and waits for the monitor task to observe the
    /// clean exit, guaranteeing no restart races a caller tearing the
    /// session down. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.active.read().await.stop().await;
        if let Some(monitor) = self.monitor.lock().await.take() {
            let _ = monitor.await;
        }
    }
}

async fn supervise(session_id: String, active: Arc<RwLock<AgentHandle>>, mut join: JoinHandle<()>, args: SpawnArgs, restart_policy: RestartPolicy) {
    let mut tracker = RestartTracker::new(restart_policy);
    loop {
        match join.await {
            Ok(()) => return,
            Err(join_err) if join_err.is_cancelled() => return,
            Err(join_err) => {
                warn!(session_id, error = %join_err, "agent loop crashed");
                if !tracker.record_restart(Instant::now()) {
                    args.bus.broadcast(&session_id, Event::Error { reason: "agent loop crashed repeatedly; giving up".into() });
                    return;
                }
                let store = match &args.persist_path {
                    Some(p) => SessionStore::load(p),
                    None => SessionStore::new(),
                };
                let (new_handle, new_join) = AgentHandle::spawn_monitored(
                    session_id.clone(),
                    store,
                    args.persist_path.clone(),
                    args.tools.clone(),
                    args.model.clone(),
                    args.bus.clone(),
                    args.config.clone(),
                    args.tools_config.clone(),
                    args.working_dir.clone(),
                    args.system_prompt.clone(),
                );
                *active.write().await = new_handle;
                join = new_join;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use relay_model::ScriptedMockProvider;

    use super::*;

    fn env() -> (Arc<EventBus>, Arc<ToolRegistry>) {
        (Arc::new(EventBus::new()), Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn spawns_and_responds_to_prompts() {
        let (bus, tools) = env();
        let model: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("hi"));
        let sup = SessionSupervisor::spawn(
            "sess-1",
            SessionStore::new(),
            None,
            tools,
            model,
            bus.clone(),
            Arc::new(AgentConfig::default()),
            Arc::new(ToolsConfig::default()),
            "/tmp",
            "",
            RestartPolicy::default(),
        );

        let (_h, mut rx) = bus.subscribe("sess-1");
        sup.handle().await.prompt("hello").await.unwrap();
        let mut saw_end = false;
        for _ in 0..20 {
            if let Some((_, Event::AgentEnd { .. })) = rx.recv().await {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (bus, tools) = env();
        let model: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("hi"));
        let sup = SessionSupervisor::spawn(
            "sess-2",
            SessionStore::new(),
            None,
            tools,
            model,
            bus,
            Arc::new(AgentConfig::default()),
            Arc::new(ToolsConfig::default()),
            "/tmp",
            "",
            RestartPolicy::default(),
        );
        sup.shutdown().await;
        sup.shutdown().await;
    }
}
