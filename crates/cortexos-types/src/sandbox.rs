use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// A per-task peer working directory on its own branch.
///
/// Invariant: at most one active `WorktreeInfo` per `task_id` at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub task_id: TaskId,
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub base_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub task_id: TaskId,
    pub branch_name: String,
    pub success: bool,
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
