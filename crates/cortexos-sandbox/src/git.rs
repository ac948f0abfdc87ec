use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error, Clone)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(String),
}

/// Object-safe, synchronous git invocation. Production code runs this on
/// a blocking thread (`tokio::task::spawn_blocking`) so the async runtime
/// is never stalled; tests substitute `MockGitRunner`.
pub trait GitRunner: Send + Sync {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

pub struct ProcessGitRunner;

impl GitRunner for ProcessGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitError::Spawn(e.to_string()))?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Records canned responses, popped in call order; once exhausted it
/// returns an empty successful output (matches the pack's `MockGit`
/// fallback behavior).
pub struct MockGitRunner {
    responses: Mutex<Vec<GitOutput>>,
    pub calls: Mutex<Vec<(std::path::PathBuf, Vec<String>)>>,
}

impl MockGitRunner {
    pub fn new(responses: Vec<GitOutput>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl GitRunner for MockGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        self.calls.lock().unwrap().push((
            dir.to_path_buf(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(GitOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            })
        } else {
            Ok(responses.remove(0))
        }
    }
}
