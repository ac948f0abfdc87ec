use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, FinishReason, Provider, ProviderInfo, ProviderRequest, ProviderResponse, TokenUsage};

/// Minimal OpenAI-compatible chat-completions backend. Shows the shape of
/// a real `Provider` without committing to one vendor's wire format --
/// most self-hosted and third-party gateways speak this dialect.
pub struct GenericHttpProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GenericHttpProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("stop") | None => FinishReason::Stop,
        Some(_) => FinishReason::Stop,
    }
}

#[async_trait]
impl Provider for GenericHttpProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: format!("Generic HTTP ({})", self.base_url),
        }
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: ProviderRequest) -> anyhow::Result<ProviderResponse> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?.error_for_status()?;
        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("provider `{}` returned no choices", self.id))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            model: request.model,
        })
    }
}
