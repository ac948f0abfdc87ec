//! Swarm Coordinator (spec.md §4.I).
//!
//! Drives an [`ExecutionPlan`] wave by wave: each wave's tasks are
//! dispatched to the agent pool concurrently, a failure in one task never
//! stops its siblings or later waves, and -- when sandboxing is enabled
//! -- every worktree created along the way is merged back in creation
//! order once the plan finishes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cortexos_pool::AgentPool;
use cortexos_sandbox::{MergeManager, WorktreeManager};
use cortexos_types::{AgentResult, AgentTask, ExecutionPlan, MergeResult, TaskId};

/// A short digest of one wave's outcome, folded into the `context` of
/// every task in subsequent waves so later agents know what came before.
#[derive(Debug, Clone)]
struct WaveSummary {
    wave_number: u32,
    text: String,
}

pub struct CoordinatorResult {
    pub agent_results: Vec<AgentResult>,
    pub merge_results: Vec<MergeResult>,
    /// Set if any task in any wave failed. Execution still ran every
    /// wave -- this only reports that something needs attention.
    pub plan_failed: bool,
}

/// Optional sandbox handles; when absent, tasks run directly in the
/// execution's working directory with no isolation or merge-back.
pub struct Sandbox {
    pub worktree: Arc<WorktreeManager>,
    pub merge: Arc<MergeManager>,
    pub base_branch: String,
}

pub struct Coordinator {
    pool: Arc<AgentPool>,
    sandbox: Option<Sandbox>,
}

impl Coordinator {
    pub fn new(pool: Arc<AgentPool>, sandbox: Option<Sandbox>) -> Self {
        Self { pool, sandbox }
    }

    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        working_dir: &Path,
        cancel: CancellationToken,
    ) -> CoordinatorResult {
        let tasks_by_id: HashMap<TaskId, _> = plan.tasks.iter().map(|t| (t.id, t)).collect();

        let mut agent_results = Vec::with_capacity(plan.tasks.len());
        let mut plan_failed = false;
        let mut summaries: Vec<WaveSummary> = Vec::new();

        for wave in &plan.waves {
            if cancel.is_cancelled() {
                plan_failed = true;
                break;
            }

            let mut agent_tasks = Vec::with_capacity(wave.task_ids.len());
            for &task_id in &wave.task_ids {
                let Some(decomposed) = tasks_by_id.get(&task_id) else {
                    continue;
                };

                let task_working_dir = if let Some(sandbox) = &self.sandbox {
                    match sandbox.worktree.create(task_id, &sandbox.base_branch).await {
                        Ok(info) => info.worktree_path,
                        Err(err) => {
                            tracing::warn!(
                                task = %task_id,
                                error = %err,
                                "worktree creation failed, running in shared working dir"
                            );
                            working_dir.clone()
                        }
                    }
                } else {
                    working_dir.clone()
                };

                agent_tasks.push(AgentTask {
                    task_id,
                    role: decomposed.role,
                    title: decomposed.title.clone(),
                    description: decomposed.description.clone(),
                    context: context_with_summaries(&decomposed.context, &summaries),
                    working_dir: task_working_dir,
                    allowed_tools: decomposed.required_tools.clone(),
                });
            }

            let wave_results = self.pool.submit_batch(agent_tasks, cancel.clone()).await;

            let mut summary_lines = Vec::new();
            for result in &wave_results {
                if !result.success {
                    plan_failed = true;
                }
                let title = tasks_by_id
                    .get(&result.task_id)
                    .map(|t| t.title.as_str())
                    .unwrap_or("task");
                summary_lines.push(format!(
                    "- {title}: {}",
                    if result.success { "done" } else { "failed" }
                ));
            }
            summaries.push(WaveSummary {
                wave_number: wave.wave_number,
                text: summary_lines.join("\n"),
            });

            agent_results.extend(wave_results);
        }

        let merge_results = if let Some(sandbox) = &self.sandbox {
            let active = sandbox.worktree.active_in_creation_order().await;
            sandbox.merge.merge_all(&active).await
        } else {
            Vec::new()
        };

        CoordinatorResult {
            agent_results,
            merge_results,
            plan_failed,
        }
    }
}

fn context_with_summaries(context: &str, summaries: &[WaveSummary]) -> String {
    if summaries.is_empty() {
        return context.to_string();
    }
    let mut text = context.to_string();
    text.push_str("\n\n--- Prior wave summaries ---\n");
    for summary in summaries {
        text.push_str(&format!("Wave {}:\n{}\n", summary.wave_number, summary.text));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_agent::Agent;
    use cortexos_providers::EchoProvider;
    use cortexos_tools::ToolRegistry;
    use cortexos_types::{AgentRole, DecomposedTask, Wave};
    use std::collections::BTreeSet;

    fn plan_with_two_waves() -> ExecutionPlan {
        let first = DecomposedTask {
            id: TaskId::new(),
            title: "first".to_string(),
            description: "d".to_string(),
            role: AgentRole::Developer,
            dependencies: BTreeSet::new(),
            priority: 5,
            estimated_complexity: 0.2,
            required_tools: Vec::new(),
            context: "please respond".to_string(),
        };
        let second = DecomposedTask {
            id: TaskId::new(),
            title: "second".to_string(),
            description: "d".to_string(),
            role: AgentRole::Validator,
            dependencies: [first.id].into_iter().collect(),
            priority: 5,
            estimated_complexity: 0.2,
            required_tools: Vec::new(),
            context: "please respond".to_string(),
        };
        let waves = vec![
            Wave { wave_number: 0, task_ids: vec![first.id], can_parallelize: false },
            Wave { wave_number: 1, task_ids: vec![second.id], can_parallelize: false },
        ];
        ExecutionPlan {
            tasks: vec![first, second],
            waves,
            estimated_tokens: 0,
            estimated_cost_usd: 0.0,
            estimated_duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn runs_every_wave_without_a_sandbox() {
        let agent = Arc::new(Agent::new(
            Arc::new(EchoProvider::default()),
            ToolRegistry::new(),
            "echo-model",
        ));
        let pool = Arc::new(AgentPool::in_process(agent, 2));
        let coordinator = Coordinator::new(pool, None);
        let plan = plan_with_two_waves();
        let result = coordinator
            .execute_plan(&plan, &PathBuf::from("."), CancellationToken::new())
            .await;
        assert_eq!(result.agent_results.len(), 2);
        assert!(!result.plan_failed);
        assert!(result.merge_results.is_empty());
    }

    #[tokio::test]
    async fn a_cancelled_token_stops_before_later_waves() {
        let agent = Arc::new(Agent::new(
            Arc::new(EchoProvider::default()),
            ToolRegistry::new(),
            "echo-model",
        ));
        let pool = Arc::new(AgentPool::in_process(agent, 2));
        let coordinator = Coordinator::new(pool, None);
        let plan = plan_with_two_waves();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = coordinator
            .execute_plan(&plan, &PathBuf::from("."), cancel)
            .await;
        assert!(result.agent_results.is_empty());
        assert!(result.plan_failed);
    }
}
