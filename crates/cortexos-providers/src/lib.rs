//! The LLM provider contract (spec.md §6).
//!
//! CortexOS treats the provider as an opaque dependency: this crate only
//! defines the `Provider` trait, its request/response shapes, and a
//! registry for selecting among configured providers. No concrete vendor
//! SDK integration lives here — that is explicitly out of this system's
//! scope (spec.md §1).

mod generic_http;
mod mock;
mod pricing;
mod registry;

pub use generic_http::GenericHttpProvider;
pub use mock::EchoProvider;
pub use pricing::{ModelPricing, PricingTable};
pub use registry::ProviderRegistry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cortexos_types::ToolSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// One call to a provider: message history, target model, and the tool
/// definitions it may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub tools: Option<Vec<ToolSchema>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    pub model: String,
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, args_delta: String },
    ToolCallEnd { id: String },
    Done {
        finish_reason: FinishReason,
        usage: TokenUsage,
    },
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// Identifies a provider for pricing lookups and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    fn is_available(&self) -> bool;

    async fn complete(&self, request: ProviderRequest) -> anyhow::Result<ProviderResponse>;

    /// Default implementation turns a single `complete` call into a
    /// two-chunk stream, matching providers that only support completion.
    async fn stream(
        &self,
        request: ProviderRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let response = self.complete(request).await?;
        let usage = response.usage;
        let finish_reason = response.finish_reason;
        let mut chunks = vec![Ok(StreamChunk::TextDelta(response.content))];
        for call in response.tool_calls {
            chunks.push(Ok(StreamChunk::ToolCallStart {
                id: call.id.clone(),
                name: call.name,
            }));
            chunks.push(Ok(StreamChunk::ToolCallDelta {
                id: call.id.clone(),
                args_delta: call.arguments_json,
            }));
            chunks.push(Ok(StreamChunk::ToolCallEnd { id: call.id }));
        }
        chunks.push(Ok(StreamChunk::Done {
            finish_reason,
            usage,
        }));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Classifies a provider error string into transient (retry with backoff)
/// or permanent (fail the agent immediately), per spec.md §4.F.
pub fn classify_provider_error(message: &str) -> cortexos_types::ProviderErrorKind {
    use cortexos_types::ProviderErrorKind;
    let lower = message.to_ascii_lowercase();
    let transient = lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("connection reset")
        || lower.contains("connection refused");
    if transient {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_types::ProviderErrorKind;

    #[test]
    fn classifies_timeouts_as_transient() {
        assert_eq!(
            classify_provider_error("request timed out after 30s"),
            ProviderErrorKind::Transient
        );
    }

    #[test]
    fn classifies_429_as_transient() {
        assert_eq!(
            classify_provider_error("HTTP 429 Too Many Requests"),
            ProviderErrorKind::Transient
        );
    }

    #[test]
    fn classifies_auth_errors_as_permanent() {
        assert_eq!(
            classify_provider_error("401 Unauthorized: invalid API key"),
            ProviderErrorKind::Permanent
        );
    }
}
