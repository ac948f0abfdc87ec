use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent::AgentResult;
use crate::cost::CostSummary;
use crate::error::CortexError;
use crate::plan::ExecutionPlan;
use crate::prompt::PromptAnalysis;
use crate::quality::GateResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    InProcess,
    Forked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStrategyKind {
    Plain,
    ReAct,
    Reflexion,
    TreeOfThought,
    Debate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub working_dir: PathBuf,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub pool_mode: PoolMode,
    #[serde(default = "default_true")]
    pub sandbox_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_fix_enabled: bool,
    #[serde(default)]
    pub reflexion_enabled: bool,
    #[serde(default)]
    pub reasoning_strategy: ReasoningStrategyKind,
    pub budget_per_run: f64,
    pub budget_per_day: f64,
    #[serde(default)]
    pub streaming: bool,
}

fn default_max_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for PoolMode {
    fn default() -> Self {
        PoolMode::InProcess
    }
}

impl Default for ReasoningStrategyKind {
    fn default() -> Self {
        ReasoningStrategyKind::Plain
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub prompt_analysis: Option<PromptAnalysis>,
    pub plan: Option<ExecutionPlan>,
    pub agent_results: Vec<AgentResult>,
    pub files_changed: Vec<PathBuf>,
    pub quality_reports: Vec<GateResult>,
    pub cost_summary: CostSummary,
    pub reasoning_traces: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn partial_failure(stage: impl Into<String>, error: CortexError) -> Self {
        Self {
            success: false,
            prompt_analysis: None,
            plan: None,
            agent_results: Vec::new(),
            files_changed: Vec::new(),
            quality_reports: Vec::new(),
            cost_summary: CostSummary::default(),
            reasoning_traces: Vec::new(),
            failed_stage: Some(stage.into()),
            error: Some(error.to_string()),
        }
    }

    /// Exit code mapping from spec.md §6: 0 success, 1 quality not met,
    /// 2 budget exceeded, 3 system error.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            return 0;
        }
        match self.failed_stage.as_deref() {
            Some("verify") => 1,
            Some("pre_authorize") => 2,
            _ => 3,
        }
    }
}
