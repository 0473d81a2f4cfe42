// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use relay_bus::{Event, EventBus};
use relay_config::AgentConfig;
use relay_model::{CompletionRequest, ModelProvider, StreamEvent, ToolSchema as WireToolSchema, Usage};
use relay_session::{Message as TreeMessage, Role as TreeRole, SessionStore};
use relay_tools::{ToolCall as ToolCallReq, ToolContext, ToolEvent, ToolRegistry, ToolRunner};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::classify::{classify, ErrorClass, RetryPolicy};
use crate::command::AgentCommand;
use crate::state::{AgentStateSnapshot, AgentStatus, PendingToolCall};

/// Drives one session's agent loop. Owned by a single task — there is no
/// locking on agent state because nothing outside this task ever touches it
/// directly; external callers communicate exclusively through `cmd_rx`.
pub struct Worker {
    session_id: String,
    store: SessionStore,
    persist_path: Option<PathBuf>,
    tools: Arc<ToolRegistry>,
    runner: ToolRunner,
    model: Arc<dyn ModelProvider>,
    bus: Arc<EventBus>,
    config: Arc<AgentConfig>,
    tools_config: Arc<relay_config::ToolsConfig>,
    working_dir: String,
    system_prompt: String,
    status: AgentStatus,
    token_usage: Usage,
    last_prompt_tokens: u32,
    /// Set when the previous provider round ended in a context-overflow
    /// error — forces compaction before the next retry regardless of ratio.
    force_compact_next: bool,
    pending_steers: VecDeque<String>,
    retry_policy: RetryPolicy,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        store: SessionStore,
        persist_path: Option<PathBuf>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        bus: Arc<EventBus>,
        config: Arc<AgentConfig>,
        tools_config: Arc<relay_config::ToolsConfig>,
        working_dir: String,
        system_prompt: String,
    ) -> Self {
        let retry_policy = RetryPolicy::new(config.retry_base_backoff_ms, config.retry_max_backoff_ms, config.retry_max_attempts);
        Self {
            session_id,
            store,
            persist_path,
            runner: ToolRunner::new(tools.clone(), &tools_config),
            tools,
            model,
            bus,
            config,
            tools_config,
            working_dir,
            system_prompt,
            status: AgentStatus::Idle,
            token_usage: Usage::default(),
            last_prompt_tokens: 0,
            force_compact_next: false,
            pending_steers: VecDeque::new(),
            retry_policy,
        }
    }

    /// The worker's main command loop. Runs until `Stop` or the channel
    /// closes (all handles dropped).
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<AgentCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                AgentCommand::Prompt { text } | AgentCommand::Steer { text } => {
                    self.submit(text, &mut cmd_rx).await;
                }
                AgentCommand::Abort => {
                    // Nothing in flight while idle — abort is a no-op.
                }
                AgentCommand::GetState { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                AgentCommand::SetModel { model, reply } => {
                    self.model = model;
                    let _ = reply.send(());
                }
                AgentCommand::Save { path, reply } => {
                    let _ = reply.send(self.store.save(&path));
                }
                AgentCommand::Branch { message_id, reply } => {
                    let result = self.store.branch(message_id).map_err(|e| anyhow::anyhow!(e));
                    let _ = reply.send(result);
                }
                AgentCommand::GetPath { reply } => {
                    let _ = reply.send(self.store.get_path());
                }
                AgentCommand::GetTree { reply } => {
                    let _ = reply.send(self.store.get_tree());
                }
                AgentCommand::ForceCompact { reply } => {
                    self.force_compact_next = true;
                    let compacted = self.maybe_compact().await;
                    let _ = reply.send(Ok(compacted));
                }
                AgentCommand::Stop => break,
            }
        }
    }

    fn snapshot(&self) -> AgentStateSnapshot {
        AgentStateSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            message_count: self.store.all_messages().len(),
            token_usage: self.token_usage,
            last_prompt_tokens: self.last_prompt_tokens,
            working_dir: self.working_dir.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }

    fn publish(&self, event: Event) {
        self.bus.broadcast(&self.session_id, event);
    }

    /// `idle --prompt--> running`. Appends the user message and drives
    /// the running/streaming loop until the agent returns to idle.
    async fn submit(&mut self, text: String, cmd_rx: &mut mpsc::Receiver<AgentCommand>) {
        if text.trim().is_empty() {
            return;
        }
        self.status = AgentStatus::Running;
        self.publish(Event::MessageApplied { text: text.clone() });
        self.store.append(TreeMessage::new("", None, TreeRole::User).with_content(text));
        self.persist();
        self.publish(Event::AgentStart);

        let cancel = CancellationToken::new();
        self.drive(cmd_rx, cancel).await;

        // A turn boundary: if anything queued up while we were busy (or the
        // exact tail of this turn), immediately start the next one.
        if self.status == AgentStatus::Idle {
            if let Some(next) = self.pending_steers.pop_front() {
                Box::pin(self.submit(next, cmd_rx)).await;
            }
        }
    }

    /// Runs `running -> streaming -> running -> ...` until the agent has no
    /// more tool calls to dispatch (-> idle), is aborted, or a permanent /
    /// exhausted-retry error ends the turn.
    async fn drive(&mut self, cmd_rx: &mut mpsc::Receiver<AgentCommand>, cancel: CancellationToken) {
        loop {
            let _ = self.maybe_compact().await;

            let mut attempt: u32 = 0;
            let outcome = loop {
                match self.stream_once(cmd_rx, &cancel).await {
                    StreamOutcome::Done(turn) => break Some(turn),
                    StreamOutcome::Aborted => return,
                    StreamOutcome::Stopped => return,
                    StreamOutcome::Error(err) => {
                        let class = classify(&err);
                        self.force_compact_next = matches!(class, ErrorClass::ContextOverflow);
                        if matches!(class, ErrorClass::Transient | ErrorClass::ContextOverflow) && !self.retry_policy.exhausted(attempt) {
                            let delay = self.retry_policy.backoff_for(attempt);
                            attempt += 1;
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        self.publish(Event::Error { reason: err.to_string() });
                        self.status = AgentStatus::Idle;
                        return;
                    }
                }
            };

            let Some(turn) = outcome else { return };

            let mut assistant_msg = TreeMessage::new("", None, TreeRole::Assistant);
            if !turn.text.is_empty() {
                assistant_msg = assistant_msg.with_content(turn.text.clone());
            }
            if !turn.thinking.is_empty() {
                assistant_msg = assistant_msg.with_thinking(turn.thinking.clone());
            }
            if !turn.tool_calls.is_empty() {
                assistant_msg = assistant_msg.with_tool_calls(turn.tool_calls.clone());
            }
            self.store.append(assistant_msg);
            self.persist();

            if turn.tool_calls.is_empty() {
                self.publish(Event::AgentEnd {
                    messages: self.store.get_path().iter().map(|m| serde_json::to_value(m).unwrap_or(Value::Null)).collect(),
                    usage: self.token_usage,
                });
                self.status = AgentStatus::Idle;
                return;
            }

            self.publish(Event::TurnEnd {
                message: serde_json::json!({ "text": turn.text }),
                tool_calls: turn.tool_calls.iter().map(|tc| serde_json::to_value(tc).unwrap_or(Value::Null)).collect(),
            });

            self.dispatch_tools(turn.tool_calls, cancel.clone()).await;
            if cancel.is_cancelled() {
                return;
            }

            // The only point at which steers are consumed mid-turn.
            while let Some(steer) = self.pending_steers.pop_front() {
                self.store.append(TreeMessage::new("", None, TreeRole::User).with_content(steer));
            }
            self.persist();
            self.status = AgentStatus::Running;
        }
    }

    async fn maybe_compact(&mut self) -> bool {
        if !self.config.compaction_enabled {
            return false;
        }
        let ratio = if self.model.context_window() > 0 { self.last_prompt_tokens as f32 / self.model.context_window() as f32 } else { 0.0 };
        if !self.force_compact_next && ratio < self.config.compaction_threshold {
            return false;
        }
        self.force_compact_next = false;

        let before = self.store.all_messages().len();
        self.publish(Event::CompactionStart { msg_count: before });
        match crate::compact::compact(&mut self.store, Some(self.model.as_ref()), self.config.compaction_keep_recent_tokens, &self.config.compaction_strategy).await {
            Ok(Some(report)) => {
                self.publish(Event::CompactionEnd { before: report.before_count, after: report.after_count });
                self.persist();
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "compaction failed");
                false
            }
        }
    }

    async fn dispatch_tools(&mut self, calls: Vec<relay_model::ToolCallWire>, cancel: CancellationToken) {
        let calls: Vec<ToolCallReq> = calls.into_iter().map(|c| ToolCallReq { call_id: c.call_id, name: c.name, args: c.arguments }).collect();
        for c in &calls {
            self.publish(Event::ToolExecutionStart { name: c.name.clone(), call_id: c.call_id.clone(), args: c.args.clone(), meta: None });
        }

        let (event_tx, mut event_rx) = mpsc::channel::<ToolEvent>(64);
        let context = ToolContext::new(self.working_dir.clone(), self.session_id.clone(), self.tools_config.clone());

        let results_fut = self.runner.run_all(calls, context, Some(event_tx), cancel);
        tokio::pin!(results_fut);

        let results = loop {
            tokio::select! {
                biased;
                Some(ev) = event_rx.recv() => {
                    match ev {
                        ToolEvent::OutputChunk { call_id: _, chunk } => self.publish(Event::StatusUpdate { phase: chunk }),
                        ToolEvent::Crashed { call_id, reason } => warn!(call_id, reason, "tool task crashed"),
                    }
                }
                results = &mut results_fut => break results,
            }
        };

        for (call, output) in results {
            let result_value = serde_json::json!({ "ok": !output.is_error, "output": output.output });
            self.publish(Event::ToolExecutionEnd { name: call.name.clone(), call_id: call.call_id.clone(), result: result_value });
            let mut msg = TreeMessage::new("", None, TreeRole::ToolResult).with_content(output.output).with_call_id(output.call_id);
            if output.is_error {
                msg = msg.mark_error();
            }
            self.store.append(msg);
        }
    }

    /// One `running --provider_stream_opened--> streaming --stream_event*--> :done|error` pass.
    async fn stream_once(&mut self, cmd_rx: &mut mpsc::Receiver<AgentCommand>, cancel: &CancellationToken) -> StreamOutcome {
        let path = self.store.get_path();
        let wire_messages = to_wire(&path, &self.system_prompt);
        let tools: Vec<WireToolSchema> = self.tools.schemas().into_iter().map(|s| WireToolSchema { name: s.name, description: s.description, parameters: s.parameters }).collect();
        let req = CompletionRequest { messages: wire_messages, tools };

        let mut stream = match self.model.stream(req).await {
            Ok(s) => s,
            Err(e) => return StreamOutcome::Error(e),
        };

        self.status = AgentStatus::Streaming;
        let watchdog = std::time::Duration::from_millis(self.config.stream_watchdog_ms);

        let mut current_text = String::new();
        let mut current_thinking = String::new();
        let mut pending_tcs: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut started_text = false;
        let mut started_thinking = false;

        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(AgentCommand::Abort) => {
                            cancel.cancel();
                            self.publish(Event::AgentAbort);
                            self.status = AgentStatus::Idle;
                            return StreamOutcome::Aborted;
                        }
                        Some(AgentCommand::Stop) | None => {
                            cancel.cancel();
                            return StreamOutcome::Stopped;
                        }
                        Some(AgentCommand::Steer { text }) | Some(AgentCommand::Prompt { text }) => {
                            self.pending_steers.push_back(text);
                        }
                        Some(AgentCommand::GetState { reply }) => { let _ = reply.send(self.snapshot()); }
                        Some(AgentCommand::SetModel { model, reply }) => { self.model = model; let _ = reply.send(()); }
                        Some(AgentCommand::Save { path, reply }) => { let _ = reply.send(self.store.save(&path)); }
                        Some(AgentCommand::Branch { message_id, reply }) => {
                            let result = self.store.branch(message_id).map_err(|e| anyhow::anyhow!(e));
                            let _ = reply.send(result);
                        }
                        Some(AgentCommand::GetPath { reply }) => { let _ = reply.send(self.store.get_path()); }
                        Some(AgentCommand::GetTree { reply }) => { let _ = reply.send(self.store.get_tree()); }
                        Some(AgentCommand::ForceCompact { reply }) => {
                            let _ = reply.send(Err(anyhow::anyhow!("cannot compact while a stream is in flight")));
                        }
                    }
                }
                chunk = tokio::time::timeout(watchdog, stream.next()) => {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(_) => return StreamOutcome::Error(anyhow::anyhow!("stream watchdog timeout: no data for {}ms", self.config.stream_watchdog_ms)),
                    };
                    let Some(event) = chunk else {
                        break;
                    };
                    match event {
                        Ok(StreamEvent::TextStart { .. }) => {
                            if !started_text { started_text = true; self.publish(Event::MessageStart); }
                        }
                        Ok(StreamEvent::TextDelta { text }) => {
                            current_text.push_str(&text);
                            self.publish(Event::MessageDelta { delta: text });
                        }
                        Ok(StreamEvent::TextDone { .. }) => {}
                        Ok(StreamEvent::ThinkingStart { .. }) => {
                            if !started_thinking { started_thinking = true; self.publish(Event::ThinkingStart); }
                        }
                        Ok(StreamEvent::ThinkingDelta { text }) => {
                            current_thinking.push_str(&text);
                            self.publish(Event::ThinkingDelta { delta: text });
                        }
                        Ok(StreamEvent::ToolCallStart { call_id, call_index, name }) => {
                            let ptc = pending_tcs.entry(call_index).or_default();
                            ptc.call_id = call_id;
                            ptc.name = name;
                        }
                        Ok(StreamEvent::ToolCallDelta { call_index, delta }) => {
                            pending_tcs.entry(call_index).or_default().args_buf.push_str(&delta);
                        }
                        Ok(StreamEvent::ToolCallDone { call_id, arguments }) => {
                            match pending_tcs.values_mut().find(|p| p.call_id == call_id) {
                                Some(ptc) => ptc.arguments = Some(arguments),
                                None => {
                                    // No matching tool_call_start seen (single-call
                                    // stream that skipped the start event) — park it
                                    // under a fresh index keyed off the call count.
                                    let idx = pending_tcs.len() as u32;
                                    pending_tcs.insert(idx, PendingToolCall { call_id, arguments: Some(arguments), ..Default::default() });
                                }
                            }
                        }
                        Ok(StreamEvent::Usage { usage }) | Ok(StreamEvent::ResponseDone { usage }) => {
                            self.token_usage = usage;
                            self.last_prompt_tokens = usage.input_tokens;
                            self.publish(Event::UsageUpdate { usage });
                        }
                        Ok(StreamEvent::Error { reason }) => return StreamOutcome::Error(anyhow::anyhow!(reason)),
                        Err(e) => return StreamOutcome::Error(e),
                    }
                }
            }
        }

        let mut sorted: Vec<(u32, PendingToolCall)> = pending_tcs.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::new();
        for (i, (_, mut ptc)) in sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                continue;
            }
            if ptc.call_id.is_empty() {
                ptc.call_id = format!("tc_synthetic_{i}");
            }
            tool_calls.push(ptc.finish());
        }

        StreamOutcome::Done(TurnResult { text: current_text, thinking: current_thinking, tool_calls })
    }

    fn persist(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = self.store.save(path) {
                warn!(error = %e, "failed to persist session");
            }
        }
    }
}

struct TurnResult {
    text: String,
    thinking: String,
    tool_calls: Vec<relay_model::ToolCallWire>,
}

enum StreamOutcome {
    Done(TurnResult),
    Aborted,
    Stopped,
    Error(anyhow::Error),
}

fn to_wire(path: &[TreeMessage], system_prompt: &str) -> Vec<relay_model::Message> {
    let mut out = Vec::with_capacity(path.len() + 1);
    if !system_prompt.is_empty() {
        out.push(relay_model::Message::system(system_prompt));
    }
    for m in path {
        let wire = match m.role {
            TreeRole::User => relay_model::Message::user(m.content.clone().unwrap_or_default()),
            TreeRole::System => relay_model::Message::system(m.content.clone().unwrap_or_default()),
            TreeRole::Assistant | TreeRole::ToolCall => match &m.tool_calls {
                Some(tcs) => relay_model::Message::assistant_with_tool_calls(m.content.clone(), tcs.clone()),
                None => relay_model::Message::assistant(m.content.clone().unwrap_or_default()),
            },
            TreeRole::ToolResult => relay_model::Message::tool_result(m.call_id.clone().unwrap_or_default(), m.content.clone().unwrap_or_default()),
        };
        out.push(wire);
    }
    out
}
