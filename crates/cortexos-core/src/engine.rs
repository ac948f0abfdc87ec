//! The Engine: wires analysis, planning, execution, and verification
//! into the single pipeline every entry point (CLI, server) drives
//! (spec.md §4.K).
//!
//! The stream controller is owned exclusively by the call that created
//! it; every other component only ever receives a clone to read from or
//! a reference to emit through (spec.md §5).

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_budget::CostLedger;
use cortexos_bus::{StreamController, DEFAULT_BUFFER_CAPACITY};
use cortexos_coordinator::{Coordinator, Sandbox};
use cortexos_observability::{emit_event, ObservabilityEvent, ProcessKind};
use cortexos_planner::{Analyzer, Decomposer, Planner};
use cortexos_pool::AgentPool;
use cortexos_providers::{PricingTable, ProviderRegistry};
use cortexos_quality::{
    all_passed, AutoFixer, ComplexityGate, LintGate, QualityVerifier, SecurityGate, TestGate,
    TypeCheckGate,
};
use cortexos_sandbox::{GitRunner, MergeManager, ProcessGitRunner, WorktreeManager};
use cortexos_strategies::{Debate, ReAct, Reflexion, ReflexionTrigger, ReasoningOutcome, ReasoningStrategy, TreeOfThought};
use cortexos_tools::ToolRegistry;
use cortexos_types::{
    AgentResult, AgentTask, CortexError, ExecutionOptions, ExecutionPlan, ExecutionResult,
    PoolMode, QualityContext, ReasoningStrategyKind, StreamEventType,
};

/// Fraction of one task's estimated token budget; mirrors the planner's
/// own per-task estimate so pre-authorization checks the same quantity
/// `ExecutionPlan::estimated_tokens` was built from (spec.md §4.B, §4.H).
fn task_token_estimate(complexity: f64) -> (u64, u64) {
    let input = 2000.0 + 8000.0 * complexity;
    let output = 500.0 + 3000.0 * complexity;
    (input as u64, output as u64)
}

#[derive(Clone)]
pub struct Engine {
    providers: ProviderRegistry,
    tools: ToolRegistry,
}

impl Engine {
    pub fn new(providers: ProviderRegistry, tools: ToolRegistry) -> Self {
        Self { providers, tools }
    }

    /// Runs one request end to end and closes the stream before
    /// returning. Callers that want to observe progress while the run is
    /// in flight should use [`Engine::execute_streaming`] instead.
    pub async fn execute(
        &self,
        prompt: String,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let stream = Arc::new(StreamController::new(DEFAULT_BUFFER_CAPACITY));
        let result = self.run(prompt, options, stream.clone(), cancel).await;
        stream.close();
        result
    }

    /// Starts a run in the background and returns the stream controller
    /// immediately, so a subscriber can attach before the first event is
    /// emitted. The returned handle resolves to the same [`ExecutionResult`]
    /// `execute` would have returned.
    pub fn execute_streaming(
        &self,
        prompt: String,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> (Arc<StreamController>, tokio::task::JoinHandle<ExecutionResult>) {
        let stream = Arc::new(StreamController::new(DEFAULT_BUFFER_CAPACITY));
        let stream_for_task = stream.clone();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let result = engine.run(prompt, options, stream_for_task.clone(), cancel).await;
            stream_for_task.close();
            result
        });
        (stream, handle)
    }

    async fn run(
        &self,
        prompt: String,
        options: ExecutionOptions,
        stream: Arc<StreamController>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        emit_event(
            tracing::Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "pipeline.start",
                component: "engine",
                correlation_id: None,
                session_id: None,
                run_id: Some(&execution_id),
                message_id: None,
                provider_id: Some(&options.provider),
                model_id: options.model.as_deref(),
                status: None,
                error_code: None,
                detail: None,
            },
        );
        stream
            .emit(
                StreamEventType::PipelineStart,
                None,
                json!({ "execution_id": execution_id, "prompt": prompt }),
            )
            .await;

        // 1 & 2: receive + analyze.
        stream.emit(StreamEventType::StageEnter, Some("analyze".to_string()), json!({})).await;
        let analysis = Analyzer::analyze(&prompt);
        stream
            .emit(
                StreamEventType::StageExit,
                Some("analyze".to_string()),
                serde_json::to_value(&analysis).unwrap_or(serde_json::Value::Null),
            )
            .await;

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| format!("{}-default", options.provider));
        let provider = match self.providers.get(Some(options.provider.as_str())).await {
            Ok(provider) => provider,
            Err(err) => {
                return self
                    .fail(&stream, "decompose", CortexError::internal(err.to_string()))
                    .await
            }
        };

        // 3: decompose + plan.
        stream.emit(StreamEventType::StageEnter, Some("plan".to_string()), json!({})).await;
        let tasks = Decomposer::decompose(&analysis, provider.as_ref(), &model).await;
        let plan = Planner::plan(tasks);
        stream
            .emit(
                StreamEventType::StageExit,
                Some("plan".to_string()),
                json!({
                    "task_count": plan.tasks.len(),
                    "wave_count": plan.waves.len(),
                    "estimated_tokens": plan.estimated_tokens,
                    "estimated_cost_usd": plan.estimated_cost_usd,
                }),
            )
            .await;

        // 4: pre-authorize against the plan's own cost estimate.
        stream.emit(StreamEventType::StageEnter, Some("pre_authorize".to_string()), json!({})).await;
        let ledger = CostLedger::new(
            PricingTable::default(),
            Some(options.budget_per_run),
            Some(options.budget_per_day),
        );
        let (total_input, total_output) = plan
            .tasks
            .iter()
            .map(|task| task_token_estimate(task.estimated_complexity))
            .fold((0u64, 0u64), |(ai, ao), (i, o)| (ai + i, ao + o));
        if let Err(err) = ledger.pre_authorize(&options.provider, &model, total_input, total_output).await {
            return self.fail(&stream, "pre_authorize", err).await;
        }
        stream.emit(StreamEventType::StageExit, Some("pre_authorize".to_string()), json!({})).await;

        // 5: execute via the coordinator (plain agents) or a reasoning
        // strategy, optionally sandboxed in per-task worktrees.
        stream.emit(StreamEventType::StageEnter, Some("execute".to_string()), json!({})).await;
        let agent = Arc::new(Agent::new(provider.clone(), self.tools.clone(), model.clone()));
        let sandbox_handles = if options.sandbox_enabled {
            self.build_sandbox(&options, &execution_id).await
        } else {
            None
        };

        let strategy = self.select_strategy(&options);
        let (mut agent_results, merge_results, mut plan_failed) = if let Some(strategy) = &strategy {
            let results = self
                .run_with_strategy(&plan, &options, &agent, &ledger, strategy.as_ref(), sandbox_handles.as_ref(), cancel.clone())
                .await;
            let plan_failed = results.iter().any(|r| !r.success);
            let merges = if let Some((worktree, merge, _)) = &sandbox_handles {
                let active = worktree.active_in_creation_order().await;
                merge.merge_all(&active).await
            } else {
                Vec::new()
            };
            (results, merges, plan_failed)
        } else {
            let pool = Arc::new(match options.pool_mode {
                PoolMode::InProcess => AgentPool::in_process(agent.clone(), options.max_workers),
                PoolMode::Forked => {
                    let binary = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cortexos"));
                    AgentPool::forked(binary, options.max_workers)
                }
            });
            let sandbox = sandbox_handles.map(|(worktree, merge, base_branch)| Sandbox {
                worktree,
                merge,
                base_branch,
            });
            let coordinator = Coordinator::new(pool, sandbox);
            let outcome = coordinator.execute_plan(&plan, &options.working_dir, cancel.clone()).await;
            (outcome.agent_results, outcome.merge_results, outcome.plan_failed)
        };
        stream
            .emit(
                StreamEventType::StageExit,
                Some("execute".to_string()),
                json!({ "plan_failed": plan_failed, "merge_count": merge_results.len() }),
            )
            .await;

        let files_changed: Vec<PathBuf> = agent_results
            .iter()
            .flat_map(|r| r.file_changes.iter().map(|c| c.path.clone()))
            .collect();

        // 6: verify, with a conditional auto-fix-then-reverify pass and a
        // conditional reflexion retry when gates still fail.
        stream.emit(StreamEventType::StageEnter, Some("verify".to_string()), json!({})).await;
        let ctx = QualityContext {
            working_dir: options.working_dir.clone(),
            files_changed: files_changed.clone(),
            execution_id: execution_id.clone(),
        };
        let verifier = QualityVerifier::new(vec![
            Arc::new(TypeCheckGate::cargo_check()),
            Arc::new(TestGate::cargo_test()),
            Arc::new(LintGate::clippy()),
            Arc::new(SecurityGate),
            Arc::new(ComplexityGate::default()),
        ])
        .with_fatal_gates(["security".to_string()]);

        let mut quality_reports = verifier.run_all(&ctx).await;

        if options.auto_fix_enabled && !all_passed(&quality_reports) {
            let has_lint_issues = quality_reports.iter().any(|r| r.gate == "lint" && !r.passed);
            if AutoFixer::cargo_clippy_fix().run(has_lint_issues, &ctx).await.is_ok() {
                quality_reports = verifier.run_all(&ctx).await;
            }
        }

        if !all_passed(&quality_reports) && options.reflexion_enabled && !cancel.is_cancelled() {
            stream
                .emit(StreamEventType::StageEnter, Some("reflexion_retry".to_string()), json!({}))
                .await;
            let reflexion = Reflexion::new(1, ReflexionTrigger::Failure);
            let retried = self
                .run_with_strategy(&plan, &options, &agent, &ledger, &reflexion, None, cancel.clone())
                .await;
            plan_failed = retried.iter().any(|r| !r.success);
            agent_results = retried;
            quality_reports = verifier.run_all(&ctx).await;
            stream
                .emit(StreamEventType::StageExit, Some("reflexion_retry".to_string()), json!({}))
                .await;
        }
        stream
            .emit(
                StreamEventType::StageExit,
                Some("verify".to_string()),
                json!({ "passed": all_passed(&quality_reports) }),
            )
            .await;

        // 7 & 8: aggregate, return, and (by the caller) close the stream.
        let cost_summary = ledger.get_summary(chrono::Duration::days(1)).await;
        let success = !plan_failed && all_passed(&quality_reports);
        let result = ExecutionResult {
            success,
            prompt_analysis: Some(analysis),
            plan: Some(plan),
            agent_results,
            files_changed,
            quality_reports,
            cost_summary,
            reasoning_traces: Vec::new(),
            failed_stage: if success { None } else { Some("verify".to_string()) },
            error: None,
        };
        stream
            .emit(
                if success { StreamEventType::PipelineComplete } else { StreamEventType::PipelineError },
                None,
                json!({ "success": success }),
            )
            .await;
        emit_event(
            if success { tracing::Level::INFO } else { tracing::Level::WARN },
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "pipeline.finish",
                component: "engine",
                correlation_id: None,
                session_id: None,
                run_id: Some(&execution_id),
                message_id: None,
                provider_id: Some(&options.provider),
                model_id: options.model.as_deref(),
                status: Some(if success { "success" } else { "failed" }),
                error_code: None,
                detail: result.failed_stage.as_deref(),
            },
        );
        result
    }

    async fn fail(&self, stream: &Arc<StreamController>, stage: &str, err: CortexError) -> ExecutionResult {
        emit_event(
            tracing::Level::ERROR,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "pipeline.error",
                component: "engine",
                correlation_id: None,
                session_id: None,
                run_id: None,
                message_id: None,
                provider_id: None,
                model_id: None,
                status: Some("failed"),
                error_code: None,
                detail: Some(stage),
            },
        );
        stream
            .emit(StreamEventType::PipelineError, Some(stage.to_string()), json!({ "error": err.to_string() }))
            .await;
        ExecutionResult::partial_failure(stage, err)
    }

    fn select_strategy(&self, options: &ExecutionOptions) -> Option<Box<dyn ReasoningStrategy>> {
        match options.reasoning_strategy {
            ReasoningStrategyKind::Plain => None,
            ReasoningStrategyKind::ReAct => Some(Box::new(ReAct::new(6))),
            ReasoningStrategyKind::Reflexion => Some(Box::new(Reflexion::new(2, ReflexionTrigger::Failure))),
            ReasoningStrategyKind::TreeOfThought => Some(Box::new(TreeOfThought::new(3))),
            ReasoningStrategyKind::Debate => Some(Box::new(Debate::new(3, 2, 0.0))),
        }
    }

    /// Runs every task in the plan, wave by wave (sequential between
    /// waves, concurrent within one, bounded by `max_workers`), through a
    /// reasoning strategy instead of the coordinator's plain agent pool --
    /// strategies need direct access to the agent and ledger that
    /// `AgentPool::submit` doesn't expose (spec.md §4.J).
    async fn run_with_strategy(
        &self,
        plan: &ExecutionPlan,
        options: &ExecutionOptions,
        agent: &Arc<Agent>,
        ledger: &CostLedger,
        strategy: &dyn ReasoningStrategy,
        sandbox: Option<&(Arc<WorktreeManager>, Arc<MergeManager>, String)>,
        cancel: CancellationToken,
    ) -> Vec<AgentResult> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(options.max_workers.max(1)));
        let cost_budget = options.budget_per_run / plan.tasks.len().max(1) as f64;
        let mut all_results = Vec::with_capacity(plan.tasks.len());

        for wave in &plan.waves {
            if cancel.is_cancelled() {
                break;
            }
            let mut handles = Vec::with_capacity(wave.task_ids.len());
            for &task_id in &wave.task_ids {
                let Some(decomposed) = plan.task(task_id) else { continue };
                let working_dir = if let Some((worktree, _, base_branch)) = sandbox {
                    match worktree.create(task_id, base_branch).await {
                        Ok(info) => info.worktree_path,
                        Err(err) => {
                            tracing::warn!(task = %task_id, error = %err, "worktree creation failed, running in shared working dir");
                            options.working_dir.clone()
                        }
                    }
                } else {
                    options.working_dir.clone()
                };

                let agent_task = AgentTask {
                    task_id,
                    role: decomposed.role,
                    title: decomposed.title.clone(),
                    description: decomposed.description.clone(),
                    context: decomposed.context.clone(),
                    working_dir,
                    allowed_tools: decomposed.required_tools.clone(),
                };

                let semaphore = semaphore.clone();
                let agent = agent.clone();
                let cancel = cancel.clone();
                handles.push(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return AgentResult::failure(agent_task.task_id, CortexError::Cancelled.to_string());
                    };
                    let outcome = strategy.run(agent_task, agent.as_ref(), ledger, cost_budget, cancel).await;
                    match outcome {
                        ReasoningOutcome::Completed { result, .. } => result,
                        ReasoningOutcome::BudgetExceeded { result, .. } => result,
                    }
                });
            }
            all_results.extend(futures::future::join_all(handles).await);
        }

        all_results
    }

    async fn build_sandbox(
        &self,
        options: &ExecutionOptions,
        execution_id: &str,
    ) -> Option<(Arc<WorktreeManager>, Arc<MergeManager>, String)> {
        let git: Arc<dyn GitRunner> = Arc::new(ProcessGitRunner);
        let repo_root = options.working_dir.clone();
        let base_branch = {
            let git = git.clone();
            let repo_root = repo_root.clone();
            tokio::task::spawn_blocking(move || git.run_git(&repo_root, &["rev-parse", "--abbrev-ref", "HEAD"]))
                .await
                .ok()
                .and_then(|r| r.ok())
                .filter(|out| out.success)
                .map(|out| out.stdout.trim().to_string())
                .filter(|branch| !branch.is_empty())
                .unwrap_or_else(|| "main".to_string())
        };
        let worktree_root = repo_root.join(".cortexos").join("worktrees");
        let worktree = Arc::new(WorktreeManager::with_git_runner(
            repo_root.clone(),
            worktree_root,
            execution_id.to_string(),
            git.clone(),
        ));
        let merge = Arc::new(MergeManager::new(repo_root, git));
        Some((worktree, merge, base_branch))
    }
}
