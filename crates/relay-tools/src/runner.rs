// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::ToolEvent;
use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolContext, ToolOutput};

/// Dispatches a batch of tool calls concurrently, one supervised task per
/// call, and collects results in input order.
///
/// Concurrency: every call in a batch is spawned immediately; the runner is
/// the back-pressure point — the agent loop doesn't start the next turn
/// until every result is in. Isolation: a panicking task never takes down
/// the caller, it's converted into `{error, "crashed: <reason>"}` with the
/// correct `call_id` preserved. Unknown tool names are synthesized as
/// errors without spawning a task at all. Calls the policy denies, or that
/// require an approval this core has no interactive channel to grant, are
/// also synthesized as errors without spawning a task.
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
}

impl ToolRunner {
    pub fn new(registry: Arc<ToolRegistry>, tools_config: &relay_config::ToolsConfig) -> Self {
        Self { registry, policy: ToolPolicy::from_config(tools_config) }
    }

    /// Run every call in `calls` concurrently and return `(ToolCall,
    /// ToolResult)` pairs in the same order as the input. If `cancel` fires
    /// before a call completes, that call is dropped from the result list
    /// entirely — per the result-correlation invariant, cancelled calls
    /// produce no synthetic tool_result.
    pub async fn run_all(
        &self,
        calls: Vec<ToolCall>,
        context: ToolContext,
        events: Option<mpsc::Sender<ToolEvent>>,
        cancel: CancellationToken,
    ) -> Vec<(ToolCall, ToolOutput)> {
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let tool = self.registry.get(&call.name);
            let denial = tool.as_deref().and_then(|tool| match self.policy.decide(&call, tool) {
                ApprovalPolicy::Deny => Some("denied by policy"),
                ApprovalPolicy::Ask => Some("requires approval: add an auto_approve pattern to run this without one"),
                ApprovalPolicy::Auto => None,
            });

            let call_for_task = call.clone();
            let mut task_context = context.clone();
            let events = events.clone();
            let call_id = call.call_id.clone();

            if let Some(emitter) = events.clone() {
                let call_id_for_emit = call_id.clone();
                task_context = task_context.with_emit(Arc::new(move |chunk| {
                    let _ = emitter.try_send(ToolEvent::OutputChunk { call_id: call_id_for_emit.clone(), chunk });
                }));
            }

            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                match (denial, tool) {
                    (Some(reason), _) => ToolOutput::err(&call_for_task.call_id, reason),
                    (None, None) => ToolOutput::err(&call_for_task.call_id, "Tool not found"),
                    (None, Some(tool)) => {
                        tokio::select! {
                            _ = cancel.cancelled() => ToolOutput::err(&call_for_task.call_id, "cancelled"),
                            out = tool.execute(&call_for_task, &task_context) => out,
                        }
                    }
                }
            });
            handles.push((call, call_id, events, handle));
        }

        let mut results = Vec::new();
        for (call, call_id, events, handle) in handles {
            if cancel.is_cancelled() {
                continue;
            }
            match handle.await {
                Ok(output) => {
                    if output.output == "cancelled" && output.is_error {
                        continue;
                    }
                    results.push((call, output));
                }
                Err(join_err) => {
                    let reason =
                        if join_err.is_panic() { format!("crashed: {join_err}") } else { format!("cancelled by runtime: {join_err}") };
                    warn!(call_id, reason, "tool task did not complete normally");
                    if let Some(tx) = &events {
                        let _ = tx.try_send(ToolEvent::Crashed { call_id: call_id.clone(), reason: reason.clone() });
                    }
                    results.push((call, ToolOutput::err(&call_id, reason)));
                }
            }
        }
        results
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;
    use crate::tool::Tool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            ToolOutput::ok(&call.call_id, "done")
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, _call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            panic!("boom");
        }
    }

    struct EmittingTool;

    #[async_trait]
    impl Tool for EmittingTool {
        fn name(&self) -> &str {
            "emitter"
        }
        fn description(&self) -> &str {
            "emits chunks"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
            ctx.emit_chunk("partial");
            ToolOutput::ok(&call.call_id, "full")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("/tmp", "sess-1", Arc::new(relay_config::ToolsConfig::default()))
    }

    #[tokio::test]
    async fn unknown_tool_synthesizes_error_without_dispatch() {
        let registry = Arc::new(ToolRegistry::new());
        let runner = ToolRunner::new(registry, &relay_config::ToolsConfig::default());
        let call = ToolCall { call_id: "c1".into(), name: "ghost".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_error);
        assert_eq!(results[0].1.output, "Tool not found");
    }

    #[tokio::test]
    async fn panicking_tool_is_isolated_and_reported_as_crash() {
        let mut registry = ToolRegistry::new();
        registry.register(PanicTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let call = ToolCall { call_id: "c1".into(), name: "panics".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_error);
        assert!(results[0].1.output.starts_with("crashed:"));
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let calls = vec![
            ToolCall { call_id: "a".into(), name: "slow".into(), args: json!({}) },
            ToolCall { call_id: "b".into(), name: "slow".into(), args: json!({}) },
            ToolCall { call_id: "c".into(), name: "slow".into(), args: json!({}) },
        ];
        let results = runner.run_all(calls, ctx(), None, CancellationToken::new()).await;
        let ids: Vec<_> = results.iter().map(|(c, _)| c.call_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn every_call_produces_exactly_one_result_with_matching_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let calls = vec![
            ToolCall { call_id: "x".into(), name: "slow".into(), args: json!({}) },
            ToolCall { call_id: "y".into(), name: "missing".into(), args: json!({}) },
        ];
        let results = runner.run_all(calls, ctx(), None, CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        for (call, out) in &results {
            assert_eq!(call.call_id, out.call_id);
        }
    }

    #[tokio::test]
    async fn emit_forwards_status_update_events() {
        let mut registry = ToolRegistry::new();
        registry.register(EmittingTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let call = ToolCall { call_id: "c1".into(), name: "emitter".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), Some(tx), CancellationToken::new()).await;
        assert_eq!(results[0].1.output, "full");
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, ToolEvent::OutputChunk { chunk, .. } if chunk == "partial"));
    }

    #[tokio::test]
    async fn cancellation_drops_results_entirely() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let call = ToolCall { call_id: "c1".into(), name: "slow".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, cancel).await;
        assert!(results.is_empty());
    }

    struct AskByDefaultTool;

    #[async_trait]
    impl Tool for AskByDefaultTool {
        fn name(&self) -> &str {
            "needs_approval"
        }
        fn description(&self) -> &str {
            "defaults to requiring approval"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Ask
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.call_id, "ran")
        }
    }

    #[tokio::test]
    async fn tool_that_defaults_to_ask_is_blocked_without_a_matching_pattern() {
        let mut registry = ToolRegistry::new();
        registry.register(AskByDefaultTool);
        let runner = ToolRunner::new(Arc::new(registry), &relay_config::ToolsConfig::default());
        let call = ToolCall { call_id: "c1".into(), name: "needs_approval".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, CancellationToken::new()).await;
        assert!(results[0].1.is_error);
        assert!(results[0].1.output.contains("requires approval"));
    }

    #[tokio::test]
    async fn an_auto_approve_pattern_on_the_tool_name_lets_it_run() {
        let mut registry = ToolRegistry::new();
        registry.register(AskByDefaultTool);
        let runner = ToolRunner::new(
            Arc::new(registry),
            &relay_config::ToolsConfig { auto_approve_patterns: vec!["needs_approval".into()], ..relay_config::ToolsConfig::default() },
        );
        let call = ToolCall { call_id: "c1".into(), name: "needs_approval".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, CancellationToken::new()).await;
        assert!(!results[0].1.is_error);
        assert_eq!(results[0].1.output, "ran");
    }

    #[tokio::test]
    async fn a_deny_pattern_blocks_an_otherwise_auto_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let runner = ToolRunner::new(
            Arc::new(registry),
            &relay_config::ToolsConfig { deny_patterns: vec!["slow".into()], ..relay_config::ToolsConfig::default() },
        );
        let call = ToolCall { call_id: "c1".into(), name: "slow".into(), args: json!({}) };
        let results = runner.run_all(vec![call], ctx(), None, CancellationToken::new()).await;
        assert!(results[0].1.is_error);
        assert_eq!(results[0].1.output, "denied by policy");
    }
}
