//! Reflexion: retry a failed task after a provider-generated self-critique
//! (spec.md §4.D, §4.J).

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_types::{AgentResult, AgentTask};

use crate::budget::{BudgetTracker, ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS};
use crate::{ReasoningOutcome, ReasoningStrategy};

/// `LowQuality`/`Both` are kept for completeness but structurally
/// unreachable: no quality-score signal is wired into this codebase
/// (Open Question 2), so only the `Failure` half of `Both` ever fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflexionTrigger {
    Failure,
    LowQuality,
    Both,
}

pub struct Reflexion {
    pub max_retries: u32,
    pub trigger: ReflexionTrigger,
}

impl Reflexion {
    pub fn new(max_retries: u32, trigger: ReflexionTrigger) -> Self {
        Self { max_retries, trigger }
    }

    fn should_retry(&self, result: &AgentResult) -> bool {
        match self.trigger {
            ReflexionTrigger::Failure | ReflexionTrigger::Both => !result.success,
            // No quality score is ever computed for an `AgentResult`, so
            // this branch can never be reached in practice.
            ReflexionTrigger::LowQuality => false,
        }
    }
}

#[async_trait]
impl ReasoningStrategy for Reflexion {
    async fn run(
        &self,
        task: AgentTask,
        agent: &Agent,
        ledger: &CostLedger,
        cost_budget: f64,
        cancel: CancellationToken,
    ) -> ReasoningOutcome {
        let mut tracker = BudgetTracker::new(ledger, agent.provider_id(), agent.model().to_string(), cost_budget);
        let mut critiques = Vec::new();

        if !tracker.authorize(ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS).await {
            return ReasoningOutcome::BudgetExceeded {
                result: AgentResult::failure(task.task_id, "reasoning budget exhausted before first attempt".to_string()),
                trace: json!({ "strategy": "reflexion", "critiques": critiques }),
            };
        }

        let mut result = agent.run(task.clone(), cancel.clone()).await;
        tracker.record(&result.token_usage).await;

        let mut current_task = task;
        let mut retries = 0;
        while retries < self.max_retries && self.should_retry(&result) {
            if cancel.is_cancelled() {
                break;
            }
            if !tracker.authorize(ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS).await {
                return ReasoningOutcome::BudgetExceeded {
                    result,
                    trace: json!({ "strategy": "reflexion", "critiques": critiques }),
                };
            }

            let critique = generate_critique(agent, &current_task, &result, cancel.clone()).await;
            critiques.push(critique.clone());

            current_task = AgentTask {
                context: format!(
                    "{}\n\n--- Self-critique of the previous attempt ---\n{}",
                    current_task.context, critique
                ),
                ..current_task
            };

            if !tracker.authorize(ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS).await {
                return ReasoningOutcome::BudgetExceeded {
                    result,
                    trace: json!({ "strategy": "reflexion", "critiques": critiques }),
                };
            }

            result = agent.run(current_task.clone(), cancel.clone()).await;
            tracker.record(&result.token_usage).await;
            retries += 1;
        }

        ReasoningOutcome::Completed {
            trace: json!({ "strategy": "reflexion", "retries": retries, "critiques": critiques }),
            result,
        }
    }
}

async fn generate_critique(
    agent: &Agent,
    task: &AgentTask,
    failed: &AgentResult,
    cancel: CancellationToken,
) -> String {
    let critique_task = AgentTask {
        context: format!(
            "The following attempt at this task failed or produced a response that needs \
             review. Give a short, concrete critique and a suggested fix.\n\nTask: {}\n\n\
             Previous response: {}\n\nError (if any): {}",
            task.description,
            failed.response,
            failed.error.clone().unwrap_or_default(),
        ),
        ..task.clone()
    };
    let mut messages = Agent::seed_messages(&critique_task);
    match agent.step(&mut messages, &critique_task, cancel).await {
        Ok(outcome) => outcome.content,
        Err(err) => format!("(critique generation failed: {err})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_providers::{EchoProvider, PricingTable};
    use cortexos_tools::ToolRegistry;
    use cortexos_types::{AgentRole, TaskId};
    use std::path::PathBuf;
    use std::sync::Arc;

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
    async fn successful_first_attempt_never_retries() {
        let agent = Agent::new(Arc::new(EchoProvider::new("echo")), ToolRegistry::new(), "echo-model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = Reflexion::new(3, ReflexionTrigger::Failure);
        let outcome = strategy
            .run(task(), &agent, &ledger, 10.0, CancellationToken::new())
            .await;
        assert!(outcome.result().success);
    }

    #[tokio::test]
    async fn low_quality_trigger_never_retries_even_on_failure() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl cortexos_providers::Provider for AlwaysFails {
            fn info(&self) -> cortexos_providers::ProviderInfo {
                cortexos_providers::ProviderInfo { id: "fail".to_string(), name: "fail".to_string() }
            }
            fn is_available(&self) -> bool {
                true
            }
            async fn complete(
                &self,
                _request: cortexos_providers::ProviderRequest,
            ) -> anyhow::Result<cortexos_providers::ProviderResponse> {
                anyhow::bail!("permanent failure")
            }
        }
        let agent = Agent::new(Arc::new(AlwaysFails), ToolRegistry::new(), "model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = Reflexion::new(3, ReflexionTrigger::LowQuality);
        let outcome = strategy
            .run(task(), &agent, &ledger, 10.0, CancellationToken::new())
            .await;
        match outcome {
            ReasoningOutcome::Completed { trace, .. } => {
                assert_eq!(trace["retries"], 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
