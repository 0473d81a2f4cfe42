// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use relay_config::CompactionStrategy;
use relay_model::{CompletionRequest, ModelProvider};
use relay_session::{Message, Role, SessionStore};
use tracing::warn;

const STRUCTURED_COMPACTION_PROMPT: &str = "\
You are a context compaction assistant for a software engineering agent. \
Produce a structured state checkpoint from the conversation history below. \
Use EXACTLY the following Markdown sections — do not add or remove sections. \
Be information-dense: preserve file paths, function names, error messages, \
code snippets, test names, and technical decisions verbatim where they matter.

## Active Task
## Key Decisions & Rationale
## Files & Artifacts
## Constraints & Requirements
## Pending Items
## Session Narrative";

const NARRATIVE_COMPACTION_PROMPT: &str = "You are a context compaction assistant. \
Summarise the following conversation history in a concise, information-dense way. \
Preserve all technical details, decisions, file names, code snippets, and tool \
outputs that may be relevant to future work.";

/// Result of a successful [`compact`] call.
pub struct CompactionReport {
    pub before_count: usize,
    pub after_count: usize,
}

/// Walk the current path newest-to-oldest, find a cut point at or before
/// `keep_recent_tokens` snapped to a user-message boundary, summarize the
/// older prefix via the provider (or truncate if the provider is
/// unavailable/fails), and splice the summary in with
/// `replace_path_segment`.
///
/// Returns `Ok(None)` when no cut point exists (path already short enough)
/// — a no-op, making repeated calls idempotent.
pub async fn compact(
    store: &mut SessionStore,
    provider: Option<&dyn ModelProvider>,
    keep_recent_tokens: usize,
    strategy: &CompactionStrategy,
) -> anyhow::Result<Option<CompactionReport>> {
    let path = store.get_path();
    if path.is_empty() {
        return Ok(None);
    }

    // Walk newest -> oldest accumulating tokens until we've kept enough
    // recent context; the first index older than that becomes our
    // candidate cut point.
    let mut kept_tokens = 0usize;
    let mut cut_index = path.len();
    for (i, msg) in path.iter().enumerate().rev() {
        kept_tokens += msg.approx_tokens();
        cut_index = i;
        if kept_tokens >= keep_recent_tokens {
            break;
        }
    }

    // Snap backward to the nearest earlier user-message boundary — never
    // cut mid-turn (an assistant message with pending tool results, etc).
    while cut_index > 0 && path[cut_index].role != Role::User {
        cut_index -= 1;
    }

    // Already a summary, or the cut landed at the root: nothing to compact.
    if cut_index == 0 {
        return Ok(None);
    }

    let prefix = &path[..cut_index];
    let prefix_ids: Vec<String> = prefix.iter().map(|m| m.id.clone()).collect();
    let before_count = store.all_messages().len();

    let transcript = serialize_transcript(prefix);
    let prompt = match strategy {
        CompactionStrategy::Structured => STRUCTURED_COMPACTION_PROMPT,
        CompactionStrategy::Narrative => NARRATIVE_COMPACTION_PROMPT,
    };

    let summary_text = match provider {
        Some(provider) => match summarize(provider, prompt, &transcript).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "compaction summarization failed, falling back to truncation");
                truncation_notice(prefix.len())
            }
        },
        None => truncation_notice(prefix.len()),
    };

    // A role distinguishable from user/assistant so a later compaction pass
    // never tries to resummarize an existing summary.
    let summary_message = Message::new("", None, Role::System).with_content(summary_text);
    store.replace_path_segment(&prefix_ids, summary_message)?;

    let after_count = store.all_messages().len();
    Ok(Some(CompactionReport { before_count, after_count }))
}

async fn summarize(provider: &dyn ModelProvider, prompt: &str, transcript: &str) -> anyhow::Result<String> {
    use futures::StreamExt;

    let req = CompletionRequest {
        messages: vec![relay_model::Message::user(format!("{prompt}\n\n---\n\n{transcript}"))],
        tools: vec![],
    };
    let mut stream = provider.stream(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let relay_model::StreamEvent::TextDelta { text: delta } = event? {
            text.push_str(&delta);
        }
    }
    if text.is_empty() {
        anyhow::bail!("provider returned no summary text");
    }
    Ok(text)
}

fn truncation_notice(dropped: usize) -> String {
    format!("[Context compacted: {dropped} earlier messages were dropped without summarization because no provider was available. Earlier decisions and file state may be missing from context.]")
}

fn serialize_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::ToolCall => "tool_call",
                Role::ToolResult => "tool_result",
                Role::System => "system",
            };
            format!("[{role}] {}", m.content.as_deref().unwrap_or(""))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
