use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One node of the execution DAG.
///
/// `dependencies` must resolve within the same batch and must not contain
/// `id` itself. The induced graph is expected to be acyclic; if it is not
/// (an upstream bug), the planner breaks the cycle deterministically
/// rather than deadlocking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposedTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub role: AgentRole,
    pub dependencies: BTreeSet<TaskId>,
    pub priority: u8,
    pub estimated_complexity: f64,
    pub required_tools: Vec<String>,
    pub context: String,
}

impl DecomposedTask {
    pub fn clamp_priority(priority: i32) -> u8 {
        priority.clamp(1, 10) as u8
    }

    pub fn clamp_complexity(complexity: f64) -> f64 {
        complexity.clamp(0.0, 1.0)
    }
}
