use serde::{Deserialize, Serialize};

use crate::task::{DecomposedTask, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    pub wave_number: u32,
    pub task_ids: Vec<TaskId>,
    pub can_parallelize: bool,
}

/// Topologically sorted task list plus wave grouping.
///
/// Invariant: every task appears in exactly one wave, and all of a task's
/// dependencies lie in strictly earlier waves (P1, P2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub tasks: Vec<DecomposedTask>,
    pub waves: Vec<Wave>,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
    pub estimated_duration_ms: u64,
}

impl ExecutionPlan {
    pub fn task(&self, id: TaskId) -> Option<&DecomposedTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn wave_of(&self, id: TaskId) -> Option<u32> {
        self.waves
            .iter()
            .find(|w| w.task_ids.contains(&id))
            .map(|w| w.wave_number)
    }
}
