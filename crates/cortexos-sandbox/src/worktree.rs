use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use cortexos_types::{CortexError, TaskId, WorktreeInfo};

use crate::git::GitRunner;

struct Entry {
    info: WorktreeInfo,
    order: usize,
}

/// Creates and tears down one git worktree per task, each on its own
/// branch (spec.md §4.E). At most one worktree may exist per task id at
/// any time.
pub struct WorktreeManager {
    repo_root: PathBuf,
    worktree_root: PathBuf,
    execution_id: String,
    git: Arc<dyn GitRunner>,
    active: Mutex<HashMap<TaskId, Entry>>,
    next_order: Mutex<usize>,
}

impl WorktreeManager {
    pub fn new(repo_root: PathBuf, worktree_root: PathBuf, execution_id: impl Into<String>) -> Self {
        Self::with_git_runner(
            repo_root,
            worktree_root,
            execution_id,
            Arc::new(crate::git::ProcessGitRunner),
        )
    }

    pub fn with_git_runner(
        repo_root: PathBuf,
        worktree_root: PathBuf,
        execution_id: impl Into<String>,
        git: Arc<dyn GitRunner>,
    ) -> Self {
        Self {
            repo_root,
            worktree_root,
            execution_id: execution_id.into(),
            git,
            active: Mutex::new(HashMap::new()),
            next_order: Mutex::new(0),
        }
    }

    fn branch_name(&self, task_id: TaskId) -> String {
        format!("cortexos/{}/{}", self.execution_id, task_id)
    }

    pub async fn create(
        &self,
        task_id: TaskId,
        base_branch: &str,
    ) -> Result<WorktreeInfo, CortexError> {
        let mut active = self.active.lock().await;
        if active.contains_key(&task_id) {
            return Err(CortexError::internal(format!(
                "worktree already exists for task {task_id}"
            )));
        }

        let branch = self.branch_name(task_id);
        let path = self.worktree_root.join(task_id.to_string());
        let path_str = path.to_string_lossy().to_string();

        let git = self.git.clone();
        let repo_root = self.repo_root.clone();
        let args = vec![
            "worktree".to_string(),
            "add".to_string(),
            "-b".to_string(),
            branch.clone(),
            path_str.clone(),
            base_branch.to_string(),
        ];
        let output = tokio::task::spawn_blocking(move || {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            git.run_git(&repo_root, &arg_refs)
        })
        .await
        .map_err(|e| CortexError::internal(e.to_string()))?
        .map_err(|e| CortexError::internal(e.to_string()))?;

        if !output.success {
            return Err(CortexError::internal(format!(
                "git worktree add failed: {}",
                output.stderr
            )));
        }

        let info = WorktreeInfo {
            task_id,
            branch_name: branch,
            worktree_path: path,
            base_branch: base_branch.to_string(),
        };

        let mut next_order = self.next_order.lock().await;
        let order = *next_order;
        *next_order += 1;

        active.insert(
            task_id,
            Entry {
                info: info.clone(),
                order,
            },
        );
        Ok(info)
    }

    pub async fn remove(&self, task_id: TaskId) -> Result<(), CortexError> {
        let mut active = self.active.lock().await;
        let Some(entry) = active.get(&task_id) else {
            return Ok(());
        };
        let path_str = entry.info.worktree_path.to_string_lossy().to_string();
        let git = self.git.clone();
        let repo_root = self.repo_root.clone();
        let output = tokio::task::spawn_blocking(move || {
            git.run_git(&repo_root, &["worktree", "remove", "--force", &path_str])
        })
        .await
        .map_err(|e| CortexError::internal(e.to_string()))?
        .map_err(|e| CortexError::internal(e.to_string()))?;

        if !output.success {
            tracing::warn!(task = %task_id, stderr = %output.stderr, "git worktree remove failed");
        }
        active.remove(&task_id);
        Ok(())
    }

    /// Returns every active worktree in the order it was created —
    /// `MergeManager` merges sequentially in this order.
    pub async fn active_in_creation_order(&self) -> Vec<WorktreeInfo> {
        let active = self.active.lock().await;
        let mut entries: Vec<&Entry> = active.values().collect();
        entries.sort_by_key(|e| e.order);
        entries.into_iter().map(|e| e.info.clone()).collect()
    }

    pub fn git_runner(&self) -> Arc<dyn GitRunner> {
        self.git.clone()
    }

    pub fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{GitOutput, MockGitRunner};

    #[tokio::test]
    async fn create_rejects_duplicate_task_id() {
        let git = Arc::new(MockGitRunner::new(vec![GitOutput {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        }]));
        let manager = WorktreeManager::with_git_runner(
            PathBuf::from("/repo"),
            PathBuf::from("/repo/.worktrees"),
            "exec-1",
            git,
        );
        let task_id = TaskId::new();
        manager.create(task_id, "main").await.unwrap();
        let second = manager.create(task_id, "main").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn active_worktrees_are_returned_in_creation_order() {
        let git = Arc::new(MockGitRunner::new(vec![
            GitOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            },
            GitOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            },
        ]));
        let manager = WorktreeManager::with_git_runner(
            PathBuf::from("/repo"),
            PathBuf::from("/repo/.worktrees"),
            "exec-1",
            git,
        );
        let first = TaskId::new();
        let second = TaskId::new();
        manager.create(first, "main").await.unwrap();
        manager.create(second, "main").await.unwrap();
        let active = manager.active_in_creation_order().await;
        assert_eq!(active[0].task_id, first);
        assert_eq!(active[1].task_id, second);
    }
}
