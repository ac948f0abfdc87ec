//! Agent (spec.md §4.F).
//!
//! Grounded on the teacher's `engine_loop.rs` streaming tool-call loop,
//! simplified to a single-agent state machine with no session/message
//! persistence -- that concern belongs to the product this was lifted
//! from, not this system.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use cortexos_providers::{
    classify_provider_error, ChatMessage, FinishReason, Provider, ProviderRequest, StreamChunk,
};
use cortexos_tools::ToolRegistry;
use cortexos_types::{
    AgentErrorKind, AgentResult, AgentTask, CortexError, FileChange, ToolContext, TokenUsage,
};

/// Retries are capped at this many attempts total (spec.md §4.F).
pub const MAX_PROVIDER_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;

/// Outcome of one provider round-trip plus whatever tools it asked for.
pub struct StepOutcome {
    pub content: String,
    pub usage: TokenUsage,
    pub file_changes: Vec<FileChange>,
    /// `true` once the provider's response contained no tool calls -- the
    /// agent's final answer for this task.
    pub finished: bool,
}

#[derive(Default)]
struct ToolCallAccum {
    name: String,
    args: String,
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_iterations: u32,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.2,
            max_iterations: 25,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn system_prompt(task: &AgentTask) -> String {
        format!(
            "You are a {:?} agent. Task: {}\n\n{}",
            task.role, task.title, task.description
        )
    }

    /// The system + user messages `run` seeds itself with. Exposed so
    /// reasoning strategies driving [`Agent::step`] directly can build an
    /// equivalent message history without duplicating the prompt format.
    pub fn seed_messages(task: &AgentTask) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: Self::system_prompt(task),
            },
            ChatMessage {
                role: "user".to_string(),
                content: task.context.clone(),
            },
        ]
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_id(&self) -> String {
        self.provider.info().id
    }

    /// Streams one provider turn to completion, accumulating tool calls by
    /// id the way the teacher's loop does, then executes every requested
    /// tool and folds its `file_change` metadata into the result.
    ///
    /// Exposed alongside [`Agent::run`] so reasoning strategies that need
    /// one provider call at a time (ReAct, Tree-of-Thought candidates) can
    /// drive the loop themselves.
    pub async fn step(
        &self,
        messages: &mut Vec<ChatMessage>,
        task: &AgentTask,
        cancel: CancellationToken,
    ) -> Result<StepOutcome, CortexError> {
        let tool_schemas = {
            let all = self.tools.list().await;
            if task.allowed_tools.is_empty() {
                all
            } else {
                all.into_iter()
                    .filter(|s| task.allowed_tools.contains(&s.name))
                    .collect()
            }
        };

        let request = ProviderRequest {
            messages: messages.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools: Some(tool_schemas),
        };

        let (completion, tool_calls, usage) =
            self.call_with_retry(request, cancel.clone()).await?;

        messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: completion.clone(),
        });

        let token_usage = TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };

        if tool_calls.is_empty() {
            return Ok(StepOutcome {
                content: completion,
                usage: token_usage,
                file_changes: Vec::new(),
                finished: true,
            });
        }

        let ctx = ToolContext {
            working_dir: task.working_dir.clone(),
            execution_id: task.task_id.to_string(),
        };
        let mut file_changes = Vec::new();
        for (id, name, args_json) in tool_calls {
            let args = serde_json::from_str(&args_json).unwrap_or(serde_json::Value::Null);
            let result = self
                .tools
                .execute(&name, args, &ctx, cancel.clone())
                .await
                .map_err(|err| CortexError::Tool {
                    tool: name.clone(),
                    message: err.to_string(),
                })?;

            if let Some(meta) = &result.metadata {
                if let Some(raw) = meta.get("file_change") {
                    if let Ok(change) = serde_json::from_value::<FileChange>(raw.clone()) {
                        file_changes.push(change);
                    }
                }
            }

            let tool_text = if result.success {
                result.output
            } else {
                format!("error: {}", result.error.unwrap_or_default())
            };
            messages.push(ChatMessage {
                role: format!("tool:{id}"),
                content: tool_text,
            });
        }

        Ok(StepOutcome {
            content: completion,
            usage: token_usage,
            file_changes,
            finished: false,
        })
    }

    /// Runs the agent to completion: a tool-call-free response, or
    /// `max_iterations` reached.
    pub async fn run(&self, task: AgentTask, cancel: CancellationToken) -> AgentResult {
        let mut messages = Self::seed_messages(&task);

        let mut total_usage = TokenUsage::default();
        let mut file_changes = Vec::new();
        let mut last_content = String::new();

        for _ in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return AgentResult::failure(task.task_id, CortexError::Cancelled.to_string());
            }

            let outcome = match self.step(&mut messages, &task, cancel.clone()).await {
                Ok(outcome) => outcome,
                Err(err) => return AgentResult::failure(task.task_id, err.to_string()),
            };

            total_usage.add(outcome.usage);
            file_changes.extend(outcome.file_changes);
            last_content = outcome.content;

            if outcome.finished {
                return AgentResult {
                    task_id: task.task_id,
                    success: true,
                    response: last_content,
                    file_changes,
                    token_usage: total_usage,
                    error: None,
                    reasoning_trace: None,
                };
            }
        }

        let err = CortexError::Agent {
            kind: AgentErrorKind::IterationLimit,
            message: format!("exceeded {} iterations", self.max_iterations),
        };
        AgentResult::failure(task.task_id, err.to_string())
    }

    /// Streams a single provider turn with retry on transient errors,
    /// exponential backoff (`100ms * 2^attempt`) capped at
    /// [`MAX_PROVIDER_ATTEMPTS`]. Any permanent error, or a transient one
    /// that exhausts its attempts, is returned as-is.
    async fn call_with_retry(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<(String, Vec<(String, String, String)>, cortexos_providers::TokenUsage), CortexError>
    {
        let mut attempt = 0;
        loop {
            match self
                .stream_once(request.clone(), cancel.clone())
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(message) => {
                    let kind = classify_provider_error(&message);
                    attempt += 1;
                    let is_transient = matches!(kind, cortexos_types::ProviderErrorKind::Transient);
                    if !is_transient || attempt >= MAX_PROVIDER_ATTEMPTS {
                        return Err(CortexError::Provider { kind, message });
                    }
                    let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                    tracing::warn!(
                        target: "cortexos.agent",
                        attempt,
                        backoff_ms = backoff,
                        "retrying transient provider error: {message}"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn stream_once(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<(String, Vec<(String, String, String)>, cortexos_providers::TokenUsage), String>
    {
        let mut stream = self
            .provider
            .stream(request, cancel.clone())
            .await
            .map_err(|err| err.to_string())?;

        let mut content = String::new();
        let mut accum: HashMap<String, ToolCallAccum> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut usage = cortexos_providers::TokenUsage::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| err.to_string())?;
            match chunk {
                StreamChunk::TextDelta(delta) => content.push_str(&delta),
                StreamChunk::ToolCallStart { id, name } => {
                    if !accum.contains_key(&id) {
                        order.push(id.clone());
                    }
                    let entry = accum.entry(id).or_default();
                    if entry.name.is_empty() {
                        entry.name = name;
                    }
                }
                StreamChunk::ToolCallDelta { id, args_delta } => {
                    let entry = accum.entry(id).or_default();
                    entry.args.push_str(&args_delta);
                }
                StreamChunk::ToolCallEnd { .. } => {}
                StreamChunk::Done {
                    finish_reason,
                    usage: final_usage,
                } => {
                    usage = final_usage;
                    if matches!(finish_reason, FinishReason::Error) {
                        return Err("provider reported finish_reason=error".to_string());
                    }
                    break;
                }
            }
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
        }

        let tool_calls = order
            .into_iter()
            .filter_map(|id| {
                let call = accum.remove(&id)?;
                if call.name.trim().is_empty() {
                    return None;
                }
                Some((id, call.name, call.args))
            })
            .collect();

        Ok((content, tool_calls, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_providers::{EchoProvider, ProviderResponse};
    use cortexos_types::{AgentRole, TaskId};
    use std::path::PathBuf;

    fn task() -> AgentTask {
        AgentTask {
            task_id: TaskId::new(),
            role: AgentRole::Developer,
            title: "demo".to_string(),
            description: "do a thing".to_string(),
            context: "please respond".to_string(),
            working_dir: PathBuf::from("."),
            allowed_tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn tool_call_free_response_finishes_on_first_iteration() {
        let provider: Arc<dyn Provider> = Arc::new(EchoProvider::new("echo"));
        let agent = Agent::new(provider, ToolRegistry::new(), "echo-model");
        let result = agent.run(task(), CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.response, "please respond");
    }

    #[tokio::test]
    async fn cancelled_token_fails_before_calling_the_provider() {
        let provider: Arc<dyn Provider> = Arc::new(EchoProvider::new("unused"));
        let agent = Agent::new(provider, ToolRegistry::new(), "echo-model");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = agent.run(task(), cancel).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn permanent_provider_error_fails_without_retry() {
        struct Failing;
        #[async_trait::async_trait]
        impl Provider for Failing {
            fn info(&self) -> cortexos_providers::ProviderInfo {
                cortexos_providers::ProviderInfo {
                    id: "failing".to_string(),
                    name: "failing".to_string(),
                }
            }
            fn is_available(&self) -> bool {
                true
            }
            async fn complete(
                &self,
                _request: cortexos_providers::ProviderRequest,
            ) -> anyhow::Result<ProviderResponse> {
                anyhow::bail!("401 Unauthorized: invalid api key")
            }
        }
        let provider: Arc<dyn Provider> = Arc::new(Failing);
        let agent = Agent::new(provider, ToolRegistry::new(), "model");
        let result = agent.run(task(), CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Permanent"));
    }
}
