use async_trait::async_trait;

use crate::{FinishReason, Provider, ProviderInfo, ProviderRequest, ProviderResponse, TokenUsage};

/// A deterministic provider used by tests: echoes the last user message and
/// never emits tool calls.
pub struct EchoProvider {
    id: String,
}

impl EchoProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: "Echo (test double)".to_string(),
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: ProviderRequest) -> anyhow::Result<ProviderResponse> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let completion_tokens = last_user.split_whitespace().count() as u64;
        Ok(ProviderResponse {
            content: last_user,
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
            finish_reason: FinishReason::Stop,
            model: request.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_the_last_user_message() {
        let provider = EchoProvider::default();
        let response = provider
            .complete(ProviderRequest {
                messages: vec![crate::ChatMessage {
                    role: "user".to_string(),
                    content: "hello world".to_string(),
                }],
                model: "echo-1".to_string(),
                max_tokens: 100,
                temperature: 0.0,
                tools: None,
            })
            .await
            .unwrap();
        assert_eq!(response.content, "hello world");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
