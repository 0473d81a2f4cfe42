// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Executes a shell command. Non-zero exit codes and spawn failures are
/// returned as tool errors rather than crashing the runner.
pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command and returns its stdout/stderr. \
         Non-zero exit codes are reported as errors."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "timeout_secs": { "type": "integer", "description": "Execution timeout in seconds" },
            },
            "required": ["command"],
            "additionalProperties": false,
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> ToolOutput {
        let command = match call.args.get("command").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.call_id, "missing 'command' argument"),
        };
        let configured_timeout = if context.config.timeout_secs > 0 { context.config.timeout_secs } else { DEFAULT_TIMEOUT_SECS };
        let timeout = call.args.get("timeout_secs").and_then(Value::as_u64).unwrap_or(configured_timeout);

        debug!(cmd = %command, "run_command tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&context.working_dir);

        match tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&truncate(&stderr));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                if output.status.success() {
                    ToolOutput::ok(&call.call_id, content)
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    ToolOutput::err(&call.call_id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.call_id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.call_id, format!("timeout after {timeout}s")),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT {
        s.to_string()
    } else {
        format!("{}...[truncated {} bytes]", &s[..OUTPUT_LIMIT], s.len() - OUTPUT_LIMIT)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(".", "sess-1", Arc::new(relay_config::ToolsConfig::default()))
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { call_id: "t1".into(), name: "run_command".into(), args }
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let out = RunCommandTool.execute(&call(json!({"command": "echo hello"})), &ctx()).await;
        assert!(!out.is_error);
        assert!(out.output.contains("hello"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_error() {
        let out = RunCommandTool.execute(&call(json!({"command": "exit 1"})), &ctx()).await;
        assert!(out.is_error);
        assert!(out.output.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let out = RunCommandTool.execute(&call(json!({})), &ctx()).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn timeout_returns_error() {
        let out = RunCommandTool.execute(&call(json!({"command": "sleep 60", "timeout_secs": 1})), &ctx()).await;
        assert!(out.is_error);
        assert!(out.output.contains("timeout"));
    }
}
