// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use relay_config::ToolsConfig;

use crate::tool::{Tool, ToolCall};

/// Per-tool approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking.
    Auto,
    /// Requires an embedder-side approval this core cannot grant on its own;
    /// treated as a block until the caller pre-approves it via config.
    Ask,
    /// Never run; return an error.
    Deny,
}

/// Policy engine that maps a tool call to an approval decision. Deny
/// patterns always win over auto-approve; a call that matches neither set of
/// patterns falls back to the tool's own [`Tool::default_policy`].
#[derive(Debug)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self { auto_patterns: compile(&cfg.auto_approve_patterns), deny_patterns: compile(&cfg.deny_patterns) }
    }

    /// Decides whether `call` may run. The patterns are matched against the
    /// call's `command` argument when one is present (the shape `run_command`
    /// and similar shell-fronting tools use) and against the tool name
    /// otherwise, so a pattern can also whitelist or block an entire tool by
    /// name (e.g. `"echo"`) rather than only a shell invocation. A call that
    /// matches no configured pattern defers to the tool's own default.
    pub fn decide(&self, call: &ToolCall, tool: &dyn Tool) -> ApprovalPolicy {
        let subject = call.args.get("command").and_then(|v| v.as_str()).unwrap_or(call.name.as_str());

        for re in &self.deny_patterns {
            if re.is_match(subject) {
                return ApprovalPolicy::Deny;
            }
        }
        for re in &self.auto_patterns {
            if re.is_match(subject) {
                return ApprovalPolicy::Auto;
            }
        }
        tool.default_policy()
    }
}

/// Convert a simple shell glob pattern to a [`Regex`]. Only `*` (match
/// anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
