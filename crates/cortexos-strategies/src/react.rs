//! ReAct: thought/action/observation loop (spec.md §4.J).

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_types::{AgentErrorKind, AgentResult, AgentTask, CortexError, TokenUsage};

use crate::budget::{BudgetTracker, ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS};
use crate::{ReasoningOutcome, ReasoningStrategy};

/// Each iteration is one `Agent::step` call: the provider either emits a
/// tool call (an "action", observed via the tool's result) or a terminal
/// answer.
pub struct ReAct {
    pub max_thoughts: u32,
}

impl ReAct {
    pub fn new(max_thoughts: u32) -> Self {
        Self { max_thoughts }
    }
}

#[async_trait]
impl ReasoningStrategy for ReAct {
    async fn run(
        &self,
        task: AgentTask,
        agent: &Agent,
        ledger: &CostLedger,
        cost_budget: f64,
        cancel: CancellationToken,
    ) -> ReasoningOutcome {
        let mut tracker = BudgetTracker::new(ledger, agent.provider_id(), agent.model().to_string(), cost_budget);
        let mut messages = Agent::seed_messages(&task);
        let mut total_usage = TokenUsage::default();
        let mut file_changes = Vec::new();
        let mut last_content = String::new();
        let mut thoughts = Vec::new();

        for thought in 0..self.max_thoughts {
            if cancel.is_cancelled() {
                break;
            }
            if !tracker.authorize(ESTIMATED_INPUT_TOKENS, ESTIMATED_OUTPUT_TOKENS).await {
                let result = partial_result(&task, last_content, total_usage, file_changes);
                return ReasoningOutcome::BudgetExceeded {
                    result,
                    trace: json!({ "strategy": "react", "thoughts": thoughts }),
                };
            }

            let outcome = match agent.step(&mut messages, &task, cancel.clone()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    return ReasoningOutcome::Completed {
                        result: AgentResult::failure(task.task_id, err.to_string()),
                        trace: json!({ "strategy": "react", "thoughts": thoughts }),
                    }
                }
            };

            tracker.record(&outcome.usage).await;
            total_usage.add(outcome.usage);
            file_changes.extend(outcome.file_changes);
            last_content = outcome.content.clone();
            thoughts.push(json!({
                "iteration": thought,
                "observation": outcome.content,
                "finished": outcome.finished,
            }));

            if outcome.finished {
                return ReasoningOutcome::Completed {
                    result: AgentResult {
                        task_id: task.task_id,
                        success: true,
                        response: last_content,
                        file_changes,
                        token_usage: total_usage,
                        error: None,
                        reasoning_trace: Some(json!({ "strategy": "react", "thoughts": thoughts })),
                    },
                    trace: json!({ "strategy": "react", "thoughts": thoughts }),
                };
            }
        }

        let err = CortexError::Agent {
            kind: AgentErrorKind::IterationLimit,
            message: format!("exceeded {} thoughts", self.max_thoughts),
        };
        ReasoningOutcome::Completed {
            result: AgentResult::failure(task.task_id, err.to_string()),
            trace: json!({ "strategy": "react", "thoughts": thoughts }),
        }
    }
}

fn partial_result(
    task: &AgentTask,
    last_content: String,
    token_usage: TokenUsage,
    file_changes: Vec<cortexos_types::FileChange>,
) -> AgentResult {
    AgentResult {
        task_id: task.task_id,
        success: false,
        response: last_content,
        file_changes,
        token_usage,
        error: Some(CortexError::Budget {
            budget: "reasoning".to_string(),
            spent: 0.0,
            limit: 0.0,
        }.to_string()),
        reasoning_trace: None,
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
    async fn finishes_on_first_tool_call_free_thought() {
        let agent = Agent::new(Arc::new(EchoProvider::new("echo")), ToolRegistry::new(), "echo-model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = ReAct::new(5);
        let outcome = strategy
            .run(task(), &agent, &ledger, 10.0, CancellationToken::new())
            .await;
        assert!(outcome.result().success);
    }

    #[tokio::test]
    async fn zero_budget_stops_before_the_first_thought() {
        let agent = Agent::new(Arc::new(EchoProvider::new("echo")), ToolRegistry::new(), "echo-model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = ReAct::new(5);
        let outcome = strategy
            .run(task(), &agent, &ledger, 0.0, CancellationToken::new())
            .await;
        assert!(matches!(outcome, ReasoningOutcome::BudgetExceeded { .. }));
    }
}
