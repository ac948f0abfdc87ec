//! Debate: up to 5 fixed perspectives argue over R rounds, a judge
//! synthesizes the final approach (spec.md §4.J).

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_types::{AgentResult, AgentTask};

use crate::budget::BudgetTracker;
use crate::{ReasoningOutcome, ReasoningStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Pragmatist,
    Skeptic,
    Innovator,
    RiskAverse,
    UserAdvocate,
}

impl Perspective {
    pub const ALL: [Perspective; 5] = [
        Perspective::Pragmatist,
        Perspective::Skeptic,
        Perspective::Innovator,
        Perspective::RiskAverse,
        Perspective::UserAdvocate,
    ];

    fn framing(self) -> &'static str {
        match self {
            Perspective::Pragmatist => "Argue for the simplest approach that works today.",
            Perspective::Skeptic => "Find the weaknesses and failure modes of other approaches.",
            Perspective::Innovator => "Argue for the most forward-looking, highest-leverage approach.",
            Perspective::RiskAverse => "Prioritize correctness and minimizing blast radius over speed.",
            Perspective::UserAdvocate => "Argue for whatever serves the end user's stated need best.",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Perspective::Pragmatist => "pragmatist",
            Perspective::Skeptic => "skeptic",
            Perspective::Innovator => "innovator",
            Perspective::RiskAverse => "risk_averse",
            Perspective::UserAdvocate => "user_advocate",
        }
    }
}

pub struct Debate {
    pub num_perspectives: usize,
    pub rounds: u32,
    pub complexity_threshold: f64,
}

impl Debate {
    pub fn new(num_perspectives: usize, rounds: u32, complexity_threshold: f64) -> Self {
        Self {
            num_perspectives: num_perspectives.clamp(1, Perspective::ALL.len()),
            rounds: rounds.max(1),
            complexity_threshold,
        }
    }

    /// Callers choosing among strategies should only pick `Debate` once
    /// the request's analyzed complexity clears this threshold -- a
    /// multi-perspective debate is too expensive to run on every request.
    pub fn engages(&self, complexity: f64) -> bool {
        complexity > self.complexity_threshold
    }

    fn perspectives(&self) -> Vec<Perspective> {
        Perspective::ALL[..self.num_perspectives].to_vec()
    }
}

#[async_trait]
impl ReasoningStrategy for Debate {
    async fn run(
        &self,
        task: AgentTask,
        agent: &Agent,
        ledger: &CostLedger,
        cost_budget: f64,
        cancel: CancellationToken,
    ) -> ReasoningOutcome {
        let mut tracker = BudgetTracker::new(ledger, agent.provider_id(), agent.model().to_string(), cost_budget);
        let perspectives = self.perspectives();
        let mut rounds_log: Vec<serde_json::Value> = Vec::new();
        let mut last_positions: Vec<(Perspective, String)> = Vec::new();

        for round in 0..self.rounds {
            if cancel.is_cancelled() {
                break;
            }
            let round_input_est = 1500 * perspectives.len() as u64;
            let round_output_est = 600 * perspectives.len() as u64;
            if !tracker.authorize(round_input_est, round_output_est).await {
                let result = synthesize_fallback(&task, &last_positions);
                return ReasoningOutcome::BudgetExceeded {
                    result,
                    trace: json!({ "strategy": "debate", "rounds": rounds_log }),
                };
            }

            let mut positions = Vec::new();
            for perspective in &perspectives {
                let prior = if round == 0 {
                    String::new()
                } else {
                    format!(
                        "\n\nPrior round's arguments:\n{}",
                        last_positions
                            .iter()
                            .map(|(p, text)| format!("[{}] {text}", p.label()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    )
                };
                let debater_task = AgentTask {
                    context: format!(
                        "{}\n\nYou are the {} debater. {}{prior}",
                        task.description,
                        perspective.label(),
                        perspective.framing()
                    ),
                    ..task.clone()
                };
                let mut messages = Agent::seed_messages(&debater_task);
                let content = match agent.step(&mut messages, &debater_task, cancel.clone()).await {
                    Ok(outcome) => {
                        tracker.record(&outcome.usage).await;
                        outcome.content
                    }
                    Err(err) => format!("(debater failed: {err})"),
                };
                positions.push((*perspective, content));
            }

            rounds_log.push(json!({
                "round": round,
                "positions": positions.iter().map(|(p, text)| json!({"perspective": p.label(), "text": text})).collect::<Vec<_>>(),
            }));
            last_positions = positions;
        }

        if !tracker.authorize(2000, 800).await {
            let result = synthesize_fallback(&task, &last_positions);
            return ReasoningOutcome::BudgetExceeded {
                result,
                trace: json!({ "strategy": "debate", "rounds": rounds_log }),
            };
        }

        let synthesis = judge(agent, &task, &last_positions, cancel.clone(), &tracker).await;

        if !tracker.authorize(3000, 1500).await {
            let result = AgentResult::failure(task.task_id, "reasoning budget exhausted before executing the synthesized approach".to_string());
            return ReasoningOutcome::BudgetExceeded {
                result,
                trace: json!({ "strategy": "debate", "rounds": rounds_log, "synthesis": synthesis }),
            };
        }

        let final_task = AgentTask {
            context: format!("{}\n\n--- Judge's synthesized approach ---\n{}", task.context, synthesis),
            ..task.clone()
        };
        let result = agent.run(final_task, cancel).await;
        tracker.record(&result.token_usage).await;

        ReasoningOutcome::Completed {
            trace: json!({ "strategy": "debate", "rounds": rounds_log, "synthesis": synthesis }),
            result,
        }
    }
}

async fn judge(
    agent: &Agent,
    task: &AgentTask,
    positions: &[(Perspective, String)],
    cancel: CancellationToken,
    tracker: &BudgetTracker<'_>,
) -> String {
    if positions.is_empty() {
        return task.context.clone();
    }
    let listed = positions
        .iter()
        .map(|(p, text)| format!("[{}] {text}", p.label()))
        .collect::<Vec<_>>()
        .join("\n");
    let judge_task = AgentTask {
        context: format!(
            "You are the judge. Synthesize a single final approach from the debaters' closing \
             positions below. Respond with the approach only.\n\nTask: {}\n\nPositions:\n{listed}",
            task.description
        ),
        ..task.clone()
    };
    let mut messages = Agent::seed_messages(&judge_task);
    match agent.step(&mut messages, &judge_task, cancel).await {
        Ok(outcome) => {
            tracker.record(&outcome.usage).await;
            outcome.content
        }
        Err(_) => positions[0].1.clone(),
    }
}

fn synthesize_fallback(task: &AgentTask, positions: &[(Perspective, String)]) -> AgentResult {
    let response = positions
        .first()
        .map(|(_, text)| text.clone())
        .unwrap_or_default();
    AgentResult {
        task_id: task.task_id,
        success: false,
        response,
        file_changes: Vec::new(),
        token_usage: cortexos_types::TokenUsage::default(),
        error: Some("reasoning budget exhausted during debate".to_string()),
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

    #[test]
    fn engages_only_above_threshold() {
        let debate = Debate::new(3, 2, 0.7);
        assert!(!debate.engages(0.5));
        assert!(debate.engages(0.9));
    }

    #[tokio::test]
    async fn runs_to_completion_with_two_perspectives_and_one_round() {
        let agent = Agent::new(Arc::new(EchoProvider::new("echo")), ToolRegistry::new(), "echo-model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = Debate::new(2, 1, 0.5);
        let outcome = strategy
            .run(task(), &agent, &ledger, 10.0, CancellationToken::new())
            .await;
        assert!(outcome.result().success);
    }
}
