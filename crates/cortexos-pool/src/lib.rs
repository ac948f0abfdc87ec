//! Agent Pool (spec.md §4.G).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cortexos_agent::Agent;
use cortexos_types::{AgentResult, AgentTask, CortexError};

/// A per-task timeout for forked workers (spec.md §4.G); a lingering child
/// past this is killed outright.
pub const FORKED_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Newline-delimited JSON frame exchanged with a forked worker over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Ready,
    Execute { task: AgentTask },
    Progress { message: String },
    Result { result: AgentResult },
    Error { message: String },
}

enum PoolMode {
    InProcess { agent: Arc<Agent> },
    Forked { binary: PathBuf },
}

/// Bounds concurrent task execution behind a `tokio::sync::Semaphore`,
/// either running `Agent::run` in-process or dispatching to a forked
/// worker process speaking the `WorkerFrame` protocol.
pub struct AgentPool {
    mode: PoolMode,
    semaphore: Arc<Semaphore>,
}

impl AgentPool {
    pub fn in_process(agent: Arc<Agent>, max_workers: usize) -> Self {
        Self {
            mode: PoolMode::InProcess { agent },
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub fn forked(binary: PathBuf, max_workers: usize) -> Self {
        Self {
            mode: PoolMode::Forked { binary },
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Queues `task` behind the semaphore (FIFO, as `Semaphore::acquire`
    /// already is) and runs it once a slot frees up.
    pub async fn submit(&self, task: AgentTask, cancel: CancellationToken) -> AgentResult {
        let task_id = task.task_id;
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return AgentResult::failure(task_id, CortexError::Cancelled.to_string());
        };

        let result = match &self.mode {
            PoolMode::InProcess { agent } => agent.run(task, cancel).await,
            PoolMode::Forked { binary } => run_forked(binary, task, cancel).await,
        };

        drop(permit);
        result
    }

    /// Dispatches every task concurrently, each gated by the same
    /// semaphore, and waits for all of them.
    pub async fn submit_batch(
        &self,
        tasks: Vec<AgentTask>,
        cancel: CancellationToken,
    ) -> Vec<AgentResult> {
        let futures = tasks
            .into_iter()
            .map(|task| self.submit(task, cancel.clone()));
        futures::future::join_all(futures).await
    }

    /// Closes the semaphore so any queued `acquire` fails fast. Does not
    /// itself await in-flight work -- callers await their own
    /// `submit`/`submit_batch` futures to observe completion.
    pub fn shutdown(&self) {
        self.semaphore.close();
    }
}

async fn run_forked(binary: &PathBuf, task: AgentTask, cancel: CancellationToken) -> AgentResult {
    let task_id = task.task_id;

    let mut child = match Command::new(binary)
        .arg("--worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return AgentResult::failure(task_id, format!("failed to spawn worker: {err}"))
        }
    };

    let run = drive_worker(&mut child, task, cancel);

    let outcome = match timeout(FORKED_TASK_TIMEOUT, run).await {
        Ok(result) => result,
        Err(_) => Err(format!(
            "worker timed out after {:?}",
            FORKED_TASK_TIMEOUT
        )),
    };

    terminate_child(&mut child).await;

    match outcome {
        Ok(result) => result,
        Err(message) => AgentResult::failure(task_id, message),
    }
}

async fn drive_worker(
    child: &mut Child,
    task: AgentTask,
    cancel: CancellationToken,
) -> Result<AgentResult, String> {
    let mut stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let mut lines = BufReader::new(stdout).lines();

    match lines.next_line().await {
        Ok(Some(line)) => match serde_json::from_str::<WorkerFrame>(&line) {
            Ok(WorkerFrame::Ready) => {}
            _ => return Err("worker did not send a ready frame".to_string()),
        },
        _ => return Err("worker closed stdout before becoming ready".to_string()),
    }

    let frame = WorkerFrame::Execute { task };
    let encoded = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
    stdin
        .write_all(encoded.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    stdin.write_all(b"\n").await.map_err(|e| e.to_string())?;

    loop {
        if cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<WorkerFrame>(&line) {
                Ok(WorkerFrame::Progress { .. } | WorkerFrame::Ready) => continue,
                Ok(WorkerFrame::Result { result }) => return Ok(result),
                Ok(WorkerFrame::Error { message }) => return Err(message),
                Err(err) => return Err(format!("malformed worker frame: {err}")),
            },
            Ok(None) => return Err("worker closed stdout without a result".to_string()),
            Err(err) => return Err(format!("failed reading worker stdout: {err}")),
        }
    }
}

/// No signal crate is in this workspace's dependency stack, so graceful
/// shutdown is approximated with a bounded wait before `start_kill`
/// rather than a real SIGTERM.
async fn terminate_child(child: &mut Child) {
    if timeout(Duration::from_secs(5), child.wait()).await.is_err() {
        let _ = child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_providers::EchoProvider;
    use cortexos_tools::ToolRegistry;
    use cortexos_types::{AgentRole, TaskId};
    use std::path::PathBuf as StdPathBuf;

    fn task() -> AgentTask {
        AgentTask {
            task_id: TaskId::new(),
            role: AgentRole::Developer,
            title: "demo".to_string(),
            description: "do a thing".to_string(),
            context: "hello".to_string(),
            working_dir: StdPathBuf::from("."),
            allowed_tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn in_process_pool_runs_submitted_tasks() {
        let agent = Arc::new(Agent::new(
            Arc::new(EchoProvider::default()),
            ToolRegistry::new(),
            "echo-model",
        ));
        let pool = AgentPool::in_process(agent, 2);
        let result = pool.submit(task(), CancellationToken::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn submit_batch_runs_more_tasks_than_the_semaphore_permits_at_once() {
        let agent = Arc::new(Agent::new(
            Arc::new(EchoProvider::default()),
            ToolRegistry::new(),
            "echo-model",
        ));
        let pool = AgentPool::in_process(agent, 1);
        let tasks = vec![task(), task(), task()];
        let results = pool.submit_batch(tasks, CancellationToken::new()).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn shutdown_makes_further_submits_fail_fast() {
        let agent = Arc::new(Agent::new(
            Arc::new(EchoProvider::default()),
            ToolRegistry::new(),
            "echo-model",
        ));
        let pool = AgentPool::in_process(agent, 1);
        pool.shutdown();
        let result = pool.submit(task(), CancellationToken::new()).await;
        assert!(!result.success);
    }
}
