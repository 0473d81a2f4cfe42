// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

/// Classification of a provider-stream error, used by the agent loop to
/// decide whether to retry, force compaction, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff: rate limits, 5xx, connection resets,
    /// overload, stream timeouts.
    Transient,
    /// Not worth retrying: auth failures, invalid parameters, malformed
    /// requests.
    Permanent,
    /// The provider rejected the request because the context window was
    /// exceeded. Forces compaction before the next retry, regardless of the
    /// usual 0.8 ratio trigger.
    ContextOverflow,
}

/// Classify an error purely from its textual form — providers report these
/// conditions in wildly different shapes, so this matches on the
/// lowest-common-denominator: substrings in the error's `Display`.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    let text = err.to_string().to_lowercase();

    let context_overflow_markers = ["context_length_exceeded", "context length exceeded", "exceed_context_size", "maximum context length", "too many tokens"];
    if context_overflow_markers.iter().any(|m| text.contains(m)) {
        return ErrorClass::ContextOverflow;
    }

    let permanent_markers = ["unauthorized", "invalid api key", "invalid_api_key", "forbidden", "invalid parameter", "invalid_request", "malformed", "401", "403", "400"];
    if permanent_markers.iter().any(|m| text.contains(m)) {
        return ErrorClass::Permanent;
    }

    let transient_markers = ["429", "rate limit", "500", "502", "503", "504", "overloaded", "timeout", "timed out", "connection reset", "connection refused", "temporarily unavailable"];
    if transient_markers.iter().any(|m| text.contains(m)) {
        return ErrorClass::Transient;
    }

    // Unknown shape: default to permanent so the loop doesn't retry forever
    // against an error it can't interpret.
    ErrorClass::Permanent
}

/// Exponential backoff schedule: base × 2^attempt, capped, bounded by a
/// maximum attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self { base_ms, max_ms, max_attempts }
    }

    /// Delay before retry attempt number `attempt` (0-indexed: the first
    /// retry is `attempt == 0`).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_ms.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(scaled.min(self.max_ms))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        let e = anyhow::anyhow!("HTTP 429 Too Many Requests");
        assert_eq!(classify(&e), ErrorClass::Transient);
    }

    #[test]
    fn server_error_is_transient() {
        let e = anyhow::anyhow!("received 503 Service Unavailable");
        assert_eq!(classify(&e), ErrorClass::Transient);
    }

    #[test]
    fn unauthorized_is_permanent() {
        let e = anyhow::anyhow!("401 Unauthorized: invalid api key");
        assert_eq!(classify(&e), ErrorClass::Permanent);
    }

    #[test]
    fn context_length_exceeded_is_context_overflow() {
        let e = anyhow::anyhow!("this model's maximum context length is 4096 tokens, context_length_exceeded");
        assert_eq!(classify(&e), ErrorClass::ContextOverflow);
    }

    #[test]
    fn unrecognized_error_defaults_to_permanent() {
        let e = anyhow::anyhow!("some bespoke provider error");
        assert_eq!(classify(&e), ErrorClass::Permanent);
    }

    #[test]
    fn backoff_doubles_each_attempt_until_capped() {
        let policy = RetryPolicy::new(2000, 60_000, 5);
        assert_eq!(policy.backoff_for(0), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_is_capped_at_max_ms() {
        let policy = RetryPolicy::new(2000, 60_000, 10);
        assert_eq!(policy.backoff_for(10), Duration::from_millis(60_000));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = RetryPolicy::new(2000, 60_000, 3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
