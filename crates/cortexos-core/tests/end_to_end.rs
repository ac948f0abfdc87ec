//! End-to-end pipeline scenarios (spec.md §8, S1 and S3).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cortexos_core::Engine;
use cortexos_providers::{
    FinishReason, Provider, ProviderInfo, ProviderRegistry, ProviderRequest, ProviderResponse,
    ToolCallRequest, TokenUsage,
};
use cortexos_tools::{ToolRegistry, WriteTool};
use cortexos_types::{ExecutionOptions, PoolMode, ReasoningStrategyKind};

/// Writes `README.md` with "hello" once asked to implement, and otherwise
/// finishes immediately with a plain answer. Good enough to drive the
/// heuristic decomposition path end to end without a real vendor.
struct ScriptedProvider;

#[async_trait]
impl Provider for ScriptedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "scripted".to_string(),
            name: "Scripted (test double)".to_string(),
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: ProviderRequest) -> anyhow::Result<ProviderResponse> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let already_wrote = request.messages.iter().any(|m| m.role.starts_with("tool:"));

        let tool_calls = if system.contains("Task: Implement") && !already_wrote {
            vec![ToolCallRequest {
                id: "call-1".to_string(),
                name: "write".to_string(),
                arguments_json: serde_json::json!({
                    "path": "README.md",
                    "content": "hello\n",
                })
                .to_string(),
            }]
        } else {
            Vec::new()
        };

        Ok(ProviderResponse {
            content: "done".to_string(),
            tool_calls,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            finish_reason: FinishReason::Stop,
            model: request.model,
        })
    }
}

fn base_options(working_dir: PathBuf) -> ExecutionOptions {
    ExecutionOptions {
        working_dir,
        provider: "scripted".to_string(),
        model: None,
        max_workers: 2,
        pool_mode: PoolMode::InProcess,
        sandbox_enabled: false,
        auto_fix_enabled: false,
        reflexion_enabled: false,
        reasoning_strategy: ReasoningStrategyKind::Plain,
        budget_per_run: 5.0,
        budget_per_day: 50.0,
        streaming: false,
    }
}

#[tokio::test]
async fn s1_trivial_heuristic_path_creates_readme() {
    let dir = tempfile::tempdir().unwrap();

    let providers = ProviderRegistry::new();
    providers.register(Arc::new(ScriptedProvider)).await;
    let tools = ToolRegistry::new();
    tools.register("write".to_string(), Arc::new(WriteTool)).await;

    let engine = Engine::new(providers, tools);
    let options = base_options(dir.path().to_path_buf());

    let result = engine
        .execute(
            "add a README with the word 'hello'".to_string(),
            options,
            CancellationToken::new(),
        )
        .await;

    let analysis = result.prompt_analysis.as_ref().expect("analysis present");
    assert!(analysis.complexity < 0.3, "complexity was {}", analysis.complexity);

    let plan = result.plan.as_ref().expect("plan present");
    assert!(
        (2..=3).contains(&plan.tasks.len()),
        "expected 2-3 tasks, got {}",
        plan.tasks.len()
    );

    assert!(result.success, "result was not successful: {result:?}");
    assert_eq!(result.files_changed.len(), 1);
    assert_eq!(result.files_changed[0], PathBuf::from("README.md"));

    let written = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
    assert!(written.to_lowercase().contains("hello"));
}

#[tokio::test]
async fn s3_budget_cutoff_fails_before_any_agent_runs() {
    let dir = tempfile::tempdir().unwrap();

    let providers = ProviderRegistry::new();
    providers.register(Arc::new(ScriptedProvider)).await;
    let tools = ToolRegistry::new();

    let engine = Engine::new(providers, tools);
    let mut options = base_options(dir.path().to_path_buf());
    options.budget_per_run = 0.01;

    let result = engine
        .execute(
            "add a new authentication endpoint to the API and update the database schema, \
             and also implement a caching layer for the session tokens, and write tests"
                .to_string(),
            options,
            CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage.as_deref(), Some("pre_authorize"));
    assert!(result.agent_results.is_empty());
    assert!(result.files_changed.is_empty());
}
