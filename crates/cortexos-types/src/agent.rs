use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::prompt::AgentRole;
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: FileChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Runtime shape handed to an agent pool worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub title: String,
    pub description: String,
    pub context: String,
    pub working_dir: PathBuf,
    pub allowed_tools: Vec<String>,
}

/// Outcome of running one `AgentTask` to completion (or failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: TaskId,
    pub success: bool,
    pub response: String,
    pub file_changes: Vec<FileChange>,
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<serde_json::Value>,
}

impl AgentResult {
    pub fn failure(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            response: String::new(),
            file_changes: Vec::new(),
            token_usage: TokenUsage::default(),
            error: Some(error.into()),
            reasoning_trace: None,
        }
    }
}
