// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, Role, StreamEvent, Usage};

/// Deterministic mock provider for tests. Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let text = format!("MOCK: {reply}");
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::TextStart { meta: None }),
            Ok(StreamEvent::TextDelta { text: text.clone() }),
            Ok(StreamEvent::TextDone { text }),
            Ok(StreamEvent::ResponseDone {
                usage: Usage { input_tokens: 10, output_tokens: 10, ..Default::default() },
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider. Each call to `stream` pops the next
/// response script from the front of the queue, letting tests specify exact
/// event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    name: String,
    /// The last `CompletionRequest` seen by this provider, for introspection.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts. The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the sequence of
    /// [`StreamEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            StreamEvent::TextStart { meta: None },
            StreamEvent::TextDelta { text: r.clone() },
            StreamEvent::TextDone { text: r },
            StreamEvent::ResponseDone { usage: Usage { input_tokens: 5, output_tokens: 5, ..Default::default() } },
        ]])
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        let call_id = call_id.into();
        let final_text = final_text.into();
        Self::new(vec![
            // Round 1 — model emits a tool call.
            vec![
                StreamEvent::ToolCallStart { call_id: call_id.clone(), call_index: 0, name: tool_name.into() },
                StreamEvent::ToolCallDone { call_id, arguments: args },
                StreamEvent::ResponseDone { usage: Usage::default() },
            ],
            // Round 2 — model responds after the tool result comes back.
            vec![
                StreamEvent::TextStart { meta: None },
                StreamEvent::TextDelta { text: final_text.clone() },
                StreamEvent::TextDone { text: final_text },
                StreamEvent::ResponseDone { usage: Usage::default() },
            ],
        ])
    }

    /// Convenience: provider whose next `stream()` call fails with `reason`.
    pub fn erroring(reason: impl Into<String>) -> Self {
        Self::new(vec![vec![StreamEvent::Error { reason: reason.into() }]])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    StreamEvent::TextStart { meta: None },
                    StreamEvent::TextDelta { text: "[no more scripts]".into() },
                    StreamEvent::TextDone { text: "[no more scripts]".into() },
                    StreamEvent::ResponseDone { usage: Usage::default() },
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<StreamEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
