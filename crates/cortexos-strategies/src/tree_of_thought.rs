//! Tree-of-Thought: generate N candidate approaches, score them in one
//! batch call, execute the top-scored one (spec.md §4.J).

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_types::{AgentResult, AgentTask};

use crate::budget::BudgetTracker;
use crate::{ReasoningOutcome, ReasoningStrategy};

pub struct TreeOfThought {
    pub num_candidates: usize,
}

impl TreeOfThought {
    pub fn new(num_candidates: usize) -> Self {
        Self {
            num_candidates: num_candidates.max(1),
        }
    }
}

#[async_trait]
impl ReasoningStrategy for TreeOfThought {
    async fn run(
        &self,
        task: AgentTask,
        agent: &Agent,
        ledger: &CostLedger,
        cost_budget: f64,
        cancel: CancellationToken,
    ) -> ReasoningOutcome {
        let mut tracker = BudgetTracker::new(ledger, agent.provider_id(), agent.model().to_string(), cost_budget);
        let input_est = 2000 * self.num_candidates as u64;
        let output_est = 800 * self.num_candidates as u64;

        if !tracker.authorize(input_est, output_est).await {
            return ReasoningOutcome::BudgetExceeded {
                result: AgentResult::failure(task.task_id, "reasoning budget exhausted before candidate generation".to_string()),
                trace: json!({ "strategy": "tree_of_thought" }),
            };
        }

        let candidates = generate_candidates(agent, &task, self.num_candidates, cancel.clone(), &tracker).await;

        if !tracker.authorize(1500, 300).await {
            return ReasoningOutcome::BudgetExceeded {
                result: AgentResult::failure(task.task_id, "reasoning budget exhausted before scoring".to_string()),
                trace: json!({ "strategy": "tree_of_thought", "candidates": candidates }),
            };
        }

        let scores = score_candidates(agent, &task, &candidates, cancel.clone(), &tracker).await;
        let best_index = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let chosen = candidates.get(best_index).cloned().unwrap_or_else(|| task.context.clone());

        if !tracker.authorize(3000, 1500).await {
            return ReasoningOutcome::BudgetExceeded {
                result: AgentResult::failure(task.task_id, "reasoning budget exhausted before executing the chosen approach".to_string()),
                trace: json!({
                    "strategy": "tree_of_thought",
                    "candidates": candidates,
                    "scores": scores,
                    "chosen_index": best_index,
                }),
            };
        }

        let candidate_task = AgentTask {
            context: format!("{}\n\n--- Chosen approach ---\n{}", task.context, chosen),
            ..task.clone()
        };
        let result = agent.run(candidate_task, cancel).await;
        tracker.record(&result.token_usage).await;

        ReasoningOutcome::Completed {
            trace: json!({
                "strategy": "tree_of_thought",
                "candidates": candidates,
                "scores": scores,
                "chosen_index": best_index,
            }),
            result,
        }
    }
}

async fn generate_candidates(
    agent: &Agent,
    task: &AgentTask,
    num_candidates: usize,
    cancel: CancellationToken,
    tracker: &BudgetTracker<'_>,
) -> Vec<String> {
    let prompt_task = AgentTask {
        context: format!(
            "Propose {num_candidates} distinct high-level approaches to the following task. \
             Respond with only a JSON array of {num_candidates} short strings, one per \
             approach.\n\nTask: {}\n{}",
            task.title, task.description
        ),
        ..task.clone()
    };
    let mut messages = Agent::seed_messages(&prompt_task);
    let content = match agent.step(&mut messages, &prompt_task, cancel).await {
        Ok(outcome) => {
            tracker.record(&outcome.usage).await;
            outcome.content
        }
        Err(_) => return vec![task.context.clone()],
    };

    match extract_json_array(&content).and_then(|s| serde_json::from_str::<Vec<String>>(s).ok()) {
        Some(candidates) if !candidates.is_empty() => candidates,
        _ => vec![task.context.clone()],
    }
}

async fn score_candidates(
    agent: &Agent,
    task: &AgentTask,
    candidates: &[String],
    cancel: CancellationToken,
    tracker: &BudgetTracker<'_>,
) -> Vec<f64> {
    let listed = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{i}. {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt_task = AgentTask {
        context: format!(
            "Score each of the following approaches to this task on a scale of 1 to 10. \
             Respond with only a JSON array of {} numbers, in the same order.\n\nTask: {}\n\n\
             Approaches:\n{listed}",
            candidates.len(),
            task.description
        ),
        ..task.clone()
    };
    let mut messages = Agent::seed_messages(&prompt_task);
    let content = match agent.step(&mut messages, &prompt_task, cancel).await {
        Ok(outcome) => {
            tracker.record(&outcome.usage).await;
            outcome.content
        }
        Err(_) => return vec![1.0; candidates.len()],
    };

    let parsed = extract_json_array(&content).and_then(|s| serde_json::from_str::<Vec<Value>>(s).ok());
    match parsed {
        Some(raw) if raw.len() == candidates.len() => raw
            .into_iter()
            .map(|v| v.as_f64().unwrap_or(1.0).clamp(1.0, 10.0) / 10.0)
            .collect(),
        _ => vec![1.0; candidates.len()],
    }
}

fn extract_json_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
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
    async fn falls_back_to_a_single_candidate_when_the_provider_does_not_reply_with_json() {
        let agent = Agent::new(Arc::new(EchoProvider::new("echo")), ToolRegistry::new(), "echo-model");
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        let strategy = TreeOfThought::new(3);
        let outcome = strategy
            .run(task(), &agent, &ledger, 10.0, CancellationToken::new())
            .await;
        assert!(outcome.result().success);
    }

    #[test]
    fn json_array_extraction_skips_brackets_inside_strings() {
        let text = "[\"a[b]\", \"c\"]";
        assert_eq!(extract_json_array(text).unwrap(), text);
    }
}
