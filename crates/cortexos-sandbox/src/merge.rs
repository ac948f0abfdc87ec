use std::path::PathBuf;
use std::sync::Arc;

use cortexos_types::{MergeResult, WorktreeInfo};

use crate::git::GitRunner;

/// Merges each worktree's branch back into the repo root, sequentially
/// and in creation order. A failure on one worktree never aborts the
/// merge of the rest (spec.md §4.E, scenario S5).
pub struct MergeManager {
    repo_root: PathBuf,
    git: Arc<dyn GitRunner>,
}

impl MergeManager {
    pub fn new(repo_root: PathBuf, git: Arc<dyn GitRunner>) -> Self {
        Self { repo_root, git }
    }

    pub async fn merge_all(&self, active: &[WorktreeInfo]) -> Vec<MergeResult> {
        let mut results = Vec::with_capacity(active.len());
        for worktree in active {
            results.push(self.merge_one(worktree).await);
        }
        results
    }

    async fn merge_one(&self, worktree: &WorktreeInfo) -> MergeResult {
        let git = self.git.clone();
        let worktree_path = worktree.worktree_path.clone();
        let task_id = worktree.task_id;

        let commit_message = format!("cortexos: task {task_id}");
        let committed = tokio::task::spawn_blocking({
            let git = git.clone();
            let path = worktree_path.clone();
            move || {
                let _ = git.run_git(&path, &["add", "-A"]);
                git.run_git(&path, &["commit", "-m", &commit_message])
            }
        })
        .await;
        if let Ok(Err(e)) = committed {
            tracing::warn!(task = %task_id, error = %e, "commit step failed, continuing to merge");
        }

        let repo_root = self.repo_root.clone();
        let branch = worktree.branch_name.clone();
        let merge_output = tokio::task::spawn_blocking({
            let git = git.clone();
            let branch = branch.clone();
            move || git.run_git(&repo_root, &["merge", "--no-ff", &branch])
        })
        .await;

        let merge_output = match merge_output {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return MergeResult {
                    task_id,
                    branch_name: branch,
                    success: false,
                    conflicts: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
            Err(e) => {
                return MergeResult {
                    task_id,
                    branch_name: branch,
                    success: false,
                    conflicts: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        if merge_output.success {
            let repo_root = self.repo_root.clone();
            let branch_for_cleanup = branch.clone();
            let _ = tokio::task::spawn_blocking({
                let git = git.clone();
                move || git.run_git(&repo_root, &["branch", "-D", &branch_for_cleanup])
            })
            .await;
            return MergeResult {
                task_id,
                branch_name: branch,
                success: true,
                conflicts: Vec::new(),
                error: None,
            };
        }

        let repo_root = self.repo_root.clone();
        let conflicts = tokio::task::spawn_blocking({
            let git = git.clone();
            move || {
                let _ = git.run_git(&repo_root, &["merge", "--abort"]);
                git.run_git(&repo_root, &["diff", "--name-only", "--diff-filter=U"])
            }
        })
        .await;

        let conflict_paths = match conflicts {
            Ok(Ok(out)) => out
                .stdout
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        };

        MergeResult {
            task_id,
            branch_name: branch,
            success: false,
            conflicts: conflict_paths,
            error: Some(merge_output.stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{GitOutput, MockGitRunner};
    use cortexos_types::TaskId;

    fn worktree(task_id: TaskId) -> WorktreeInfo {
        WorktreeInfo {
            task_id,
            branch_name: format!("cortexos/exec/{task_id}"),
            worktree_path: PathBuf::from("/tmp/wt"),
            base_branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_merge_reports_no_conflicts() {
        let git = Arc::new(MockGitRunner::new(vec![
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // add -A
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // commit
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // merge
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // branch -D
        ]));
        let manager = MergeManager::new(PathBuf::from("/repo"), git);
        let task_id = TaskId::new();
        let result = manager.merge_all(&[worktree(task_id)]).await;
        assert!(result[0].success);
        assert!(result[0].conflicts.is_empty());
    }

    #[tokio::test]
    async fn conflicted_merge_aborts_and_collects_conflict_paths() {
        let git = Arc::new(MockGitRunner::new(vec![
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // add -A
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // commit
            GitOutput { success: false, stdout: String::new(), stderr: "conflict".to_string() }, // merge
            GitOutput { success: true, stdout: String::new(), stderr: String::new() }, // merge --abort
            GitOutput { success: true, stdout: "src/lib.rs\n".to_string(), stderr: String::new() }, // diff
        ]));
        let manager = MergeManager::new(PathBuf::from("/repo"), git);
        let task_id = TaskId::new();
        let result = manager.merge_all(&[worktree(task_id)]).await;
        assert!(!result[0].success);
        assert_eq!(result[0].conflicts, vec![PathBuf::from("src/lib.rs")]);
    }

    #[tokio::test]
    async fn merge_continues_to_next_worktree_after_a_failure() {
        let git = Arc::new(MockGitRunner::new(vec![
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: false, stdout: String::new(), stderr: "conflict".to_string() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
            GitOutput { success: true, stdout: String::new(), stderr: String::new() },
        ]));
        let manager = MergeManager::new(PathBuf::from("/repo"), git);
        let first = TaskId::new();
        let second = TaskId::new();
        let results = manager.merge_all(&[worktree(first), worktree(second)]).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
    }
}
