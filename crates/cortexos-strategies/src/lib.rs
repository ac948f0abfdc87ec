//! Reasoning Strategies (spec.md §4.J).
//!
//! Each strategy wraps the plain [`Agent`] with an extra deliberation
//! step -- thought/action loops, self-critique retries, candidate
//! scoring, multi-perspective debate -- and pre-authorizes every extra
//! provider round it spends against a local `cost_budget` on top of the
//! ledger's own run/day budgets (spec.md §4.B). Hard caps at three
//! places -- strategy, agent, engine -- bound runaway recursion (spec.md
//! §7 "Unbounded recursion risk").

mod budget;
mod debate;
mod react;
mod reflexion;
mod tree_of_thought;

pub use debate::{Debate, Perspective};
pub use react::ReAct;
pub use reflexion::{Reflexion, ReflexionTrigger};
pub use tree_of_thought::TreeOfThought;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_types::{AgentResult, AgentTask};

#[derive(Debug, Clone)]
pub enum ReasoningOutcome {
    Completed { result: AgentResult, trace: serde_json::Value },
    BudgetExceeded { result: AgentResult, trace: serde_json::Value },
}

impl ReasoningOutcome {
    pub fn result(&self) -> &AgentResult {
        match self {
            ReasoningOutcome::Completed { result, .. } => result,
            ReasoningOutcome::BudgetExceeded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> AgentResult {
        match self {
            ReasoningOutcome::Completed { result, .. } => result,
            ReasoningOutcome::BudgetExceeded { result, .. } => result,
        }
    }
}

#[async_trait]
pub trait ReasoningStrategy: Send + Sync {
    async fn run(
        &self,
        task: AgentTask,
        agent: &Agent,
        ledger: &CostLedger,
        cost_budget: f64,
        cancel: CancellationToken,
    ) -> ReasoningOutcome;
}
