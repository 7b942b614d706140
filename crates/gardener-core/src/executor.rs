use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::agent::AgentRunner;
use crate::git::RepoVcs;
use crate::types::{CycleContext, WorkerResult, WorkerTask};

/// Bounded-concurrency executor for worker tasks. At most
/// `parallel_workers` agents run at once; one failed or timed-out task never
/// takes the rest of the batch down.
pub struct WorkerPool {
    vcs: Arc<dyn RepoVcs>,
    runner: Arc<dyn AgentRunner>,
    parallel_workers: usize,
    task_timeout: Duration,
    base_branch: String,
}

impl WorkerPool {
    pub fn new(
        vcs: Arc<dyn RepoVcs>,
        runner: Arc<dyn AgentRunner>,
        parallel_workers: usize,
        timeout_minutes: u64,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            runner,
            parallel_workers: parallel_workers.max(1),
            task_timeout: Duration::from_secs(timeout_minutes * 60),
            base_branch: base_branch.into(),
        }
    }

    /// Run the whole batch. Results come back in the same order as the
    /// input tasks regardless of completion order.
    pub async fn run_batch(&self, tasks: Vec<WorkerTask>, ctx: CycleContext) -> Vec<WorkerResult> {
        let semaphore = Arc::new(Semaphore::new(self.parallel_workers));
        // Worktree creation mutates shared git metadata; serialize it so
        // concurrent workers never race on the same lock files.
        let workspace_lock = Arc::new(Mutex::new(()));

        let mut join_set = JoinSet::new();
        let total = tasks.len();

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let workspace_lock = Arc::clone(&workspace_lock);
            let vcs = Arc::clone(&self.vcs);
            let runner = Arc::clone(&self.runner);
            let base_branch = self.base_branch.clone();
            let task_timeout = self.task_timeout;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = run_one(
                    vcs,
                    runner,
                    workspace_lock,
                    task,
                    &base_branch,
                    task_timeout,
                    ctx,
                )
                .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<WorkerResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    tracing::error!(error = %e, "worker task aborted");
                }
            }
        }

        // A panicked worker leaves its slot empty; surface that as a failure
        // rather than silently dropping the task.
        slots
            .into_iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                if slot.is_none() {
                    tracing::error!(index, "worker produced no result");
                }
                slot
            })
            .collect()
    }
}

async fn run_one(
    vcs: Arc<dyn RepoVcs>,
    runner: Arc<dyn AgentRunner>,
    workspace_lock: Arc<Mutex<()>>,
    task: WorkerTask,
    base_branch: &str,
    task_timeout: Duration,
    ctx: CycleContext,
) -> WorkerResult {
    let WorkerTask { issue, branch_name } = task;
    tracing::info!(
        cycle_id = ctx.cycle_id,
        issue_id = issue.id,
        branch = %branch_name,
        "worker starting"
    );

    let workspace = {
        let _guard = workspace_lock.lock().await;
        match vcs.create_workspace(&branch_name, base_branch) {
            Ok(path) => path,
            Err(e) => {
                return WorkerResult {
                    issue,
                    branch_name,
                    success: false,
                    error: Some(format!("workspace creation failed: {e}")),
                };
            }
        }
    };

    let outcome = timeout(
        task_timeout,
        runner.run(&issue, &workspace, base_branch, ctx),
    )
    .await;

    let result = match outcome {
        Err(_) => Err(format!(
            "timed out after {} minutes",
            task_timeout.as_secs() / 60
        )),
        Ok(Err(e)) => Err(format!("agent run failed: {e}")),
        Ok(Ok(agent)) if !agent.success => Err(format!("agent reported failure: {}", agent.summary)),
        Ok(Ok(agent)) => finalize_branch(vcs.as_ref(), &workspace, &branch_name, base_branch, &issue.title)
            .map(|()| agent),
    };

    {
        let _guard = workspace_lock.lock().await;
        if let Err(e) = vcs.remove_workspace(&workspace) {
            tracing::warn!(branch = %branch_name, error = %e, "workspace cleanup failed");
        }
    }

    match result {
        Ok(agent) => {
            tracing::info!(
                cycle_id = ctx.cycle_id,
                issue_id = issue.id,
                branch = %branch_name,
                summary = %agent.summary,
                "worker finished"
            );
            WorkerResult {
                issue,
                branch_name,
                success: true,
                error: None,
            }
        }
        Err(message) => {
            tracing::warn!(
                cycle_id = ctx.cycle_id,
                issue_id = issue.id,
                branch = %branch_name,
                error = %message,
                "worker failed"
            );
            WorkerResult {
                issue,
                branch_name,
                success: false,
                error: Some(message),
            }
        }
    }
}

/// Commit whatever the agent left in the workspace and push the branch.
/// An agent that changed nothing is a failure: the issue stays open for a
/// human instead of producing an empty PR.
fn finalize_branch(
    vcs: &dyn RepoVcs,
    workspace: &str,
    branch: &str,
    base_branch: &str,
    issue_title: &str,
) -> Result<(), String> {
    let committed = vcs
        .commit_all(workspace, issue_title)
        .map_err(|e| format!("commit failed: {e}"))?;
    let has_commits = vcs
        .has_new_commits(workspace, base_branch)
        .map_err(|e| format!("commit check failed: {e}"))?;
    if !committed && !has_commits {
        return Err("agent produced no changes".to_string());
    }
    vcs.push_branch(workspace, branch)
        .map_err(|e| format!("push failed: {e}"))
}
