// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider, forwarded verbatim.
    pub call_id: String,
    pub name: String,
    pub args: Value,
}

/// The result of executing a tool. A crashed or panicking task is converted
/// into an error result by the runner — `Tool::execute` itself never needs
/// to special-case crashes.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), output: output.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), output: reason.into(), is_error: true }
    }
}

/// Describes the shape of a tool's text output for context-aware truncation
/// when a result exceeds the configured token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal/process output: keep the first 60 + last 40 lines so both
    /// the command preamble and the final result stay visible.
    HeadTail,
    /// Ordered match list: keep the leading matches, highest relevance first.
    MatchList,
    /// File content: keep a head and tail window with a separator.
    FileContent,
    /// Hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// A single chunk of streamed tool output, forwarded to the runner as it's
/// produced. The runner republishes these as `status_update` events; the
/// tool's final return value still carries the complete output.
pub type EmitFn = Arc<dyn Fn(String) + Send + Sync>;

/// Execution context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: String,
    pub session_id: String,
    /// Frozen snapshot of config relevant to tool execution (e.g. approval
    /// patterns, timeout). Tools never mutate live agent state.
    pub config: Arc<relay_config::ToolsConfig>,
    pub emit: Option<EmitFn>,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<String>, session_id: impl Into<String>, config: Arc<relay_config::ToolsConfig>) -> Self {
        Self { working_dir: working_dir.into(), session_id: session_id.into(), config, emit: None }
    }

    pub fn with_emit(mut self, emit: EmitFn) -> Self {
        self.emit = Some(emit);
        self
    }

    pub fn emit_chunk(&self, chunk: impl Into<String>) {
        if let Some(emit) = &self.emit {
            emit(chunk.into());
        }
    }
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Default approval level for this tool.
    fn default_policy(&self) -> ApprovalPolicy;
    /// Describes the shape of this tool's output for context-aware
    /// truncation. Override when the leading or trailing portion of the
    /// output is more useful than a hard cut.
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Execute the tool. Errors should be wrapped in [`ToolOutput::err`] —
    /// returning `Err` here is reserved for crashes the runner can't
    /// otherwise observe (panics are caught separately by the spawn join).
    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("/tmp", "sess-1", Arc::new(relay_config::ToolsConfig::default()))
    }

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn output_category_variants_are_distinct() {
        assert_ne!(OutputCategory::HeadTail, OutputCategory::MatchList);
        assert_ne!(OutputCategory::HeadTail, OutputCategory::FileContent);
        assert_ne!(OutputCategory::HeadTail, OutputCategory::Generic);
    }

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, _context: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.call_id, "ok")
        }
    }

    #[test]
    fn tool_default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[tokio::test]
    async fn minimal_tool_executes_successfully() {
        let call = ToolCall { call_id: "c1".into(), name: "minimal".into(), args: json!({}) };
        let out = MinimalTool.execute(&call, &ctx()).await;
        assert!(!out.is_error);
        assert_eq!(out.output, "ok");
    }

    #[test]
    fn emit_chunk_invokes_callback_when_present() {
        use std::sync::{Arc as StdArc, Mutex};
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let context = ctx().with_emit(StdArc::new(move |chunk| seen2.lock().unwrap().push(chunk)));
        context.emit_chunk("hello");
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn emit_chunk_is_noop_without_callback() {
        ctx().emit_chunk("ignored"); // must not panic
    }
}
