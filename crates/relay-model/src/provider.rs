// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, StreamEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// A model provider: something that turns a [`CompletionRequest`] into a
/// normalized [`StreamEvent`] stream. The agent loop never inspects wire
/// JSON directly — every provider implementation is responsible for
/// producing this shape, which keeps the loop identical across providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Context window size for this provider/model, used by the
    /// auto-compaction trigger. Returns a conservative default when unknown.
    fn context_window(&self) -> u32 {
        crate::catalog::context_window(self.name(), self.model_name(), 128_000)
    }

    /// Maximum output tokens for this provider/model.
    fn max_output_tokens(&self) -> u32 {
        crate::catalog::max_output_tokens(self.name(), self.model_name(), 4_096)
    }
}
