use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gardener_core::agent::{AgentOutcome, AgentRunner};
use gardener_core::config::MergeMethod;
use gardener_core::executor::WorkerPool;
use gardener_core::git::{MergeOutcome, RepoVcs};
use gardener_core::types::{CycleContext, TrackedIssue, WorkerTask};

// ── Fakes ────────────────────────────────────────────────────────────────

struct FakeVcs {
    fail_workspace_for: Option<String>,
    has_changes: AtomicBool,
    fail_push: AtomicBool,
}

impl FakeVcs {
    fn new() -> Self {
        Self {
            fail_workspace_for: None,
            has_changes: AtomicBool::new(true),
            fail_push: AtomicBool::new(false),
        }
    }
}

impl RepoVcs for FakeVcs {
    fn create_workspace(&self, branch: &str, _base: &str) -> anyhow::Result<String> {
        if self.fail_workspace_for.as_deref() == Some(branch) {
            anyhow::bail!("worktree add refused");
        }
        Ok(format!("/tmp/work/{branch}"))
    }

    fn remove_workspace(&self, _workspace: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit_all(&self, _workspace: &str, _message: &str) -> anyhow::Result<bool> {
        Ok(self.has_changes.load(Ordering::SeqCst))
    }

    fn has_new_commits(&self, _workspace: &str, _base: &str) -> anyhow::Result<bool> {
        Ok(self.has_changes.load(Ordering::SeqCst))
    }

    fn push_branch(&self, _workspace: &str, _branch: &str) -> anyhow::Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            anyhow::bail!("remote rejected the push");
        }
        Ok(())
    }

    fn fetch(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn merge_branch(
        &self,
        _branch: &str,
        _base: &str,
        _method: MergeMethod,
    ) -> anyhow::Result<MergeOutcome> {
        Ok(MergeOutcome::Clean)
    }

    fn rebase_branch(&self, _branch: &str, _base: &str) -> anyhow::Result<MergeOutcome> {
        Ok(MergeOutcome::Clean)
    }

    fn push_base(&self, _base: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete_branch(&self, _branch: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Scripted agent: issues whose title contains "fail" report failure, titles
/// containing "error" make the run itself error, everything else succeeds.
struct FakeRunner {
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
}

impl FakeRunner {
    fn new() -> Self {
        Self {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl AgentRunner for FakeRunner {
    async fn run(
        &self,
        issue: &TrackedIssue,
        _workspace: &str,
        _base_branch: &str,
        _ctx: CycleContext,
    ) -> anyhow::Result<AgentOutcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if issue.title.contains("error") {
            anyhow::bail!("agent process crashed");
        }
        if issue.title.contains("fail") {
            return Ok(AgentOutcome {
                success: false,
                summary: "could not satisfy the request".to_string(),
                detail: String::new(),
            });
        }
        Ok(AgentOutcome {
            success: true,
            summary: format!("done: {}", issue.title),
            detail: String::new(),
        })
    }
}

fn task(id: u64, title: &str) -> WorkerTask {
    WorkerTask::for_issue(TrackedIssue {
        id,
        title: title.to_string(),
        body: String::new(),
        labels: BTreeSet::new(),
    })
}

fn pool_with(vcs: Arc<FakeVcs>, runner: Arc<FakeRunner>, workers: usize) -> WorkerPool {
    WorkerPool::new(vcs, runner, workers, 10, "main")
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_preserves_input_order() {
    let pool = pool_with(Arc::new(FakeVcs::new()), Arc::new(FakeRunner::new()), 4);
    let tasks = vec![task(1, "first"), task(2, "second"), task(3, "third")];
    let results = pool.run_batch(tasks, CycleContext::new(1)).await;
    let ids: Vec<u64> = results.iter().map(|r| r.issue.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(results.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_one_failure_does_not_sink_the_batch() {
    let pool = pool_with(Arc::new(FakeVcs::new()), Arc::new(FakeRunner::new()), 4);
    let tasks = vec![task(1, "ok"), task(2, "please fail"), task(3, "also ok")];
    let results = pool.run_batch(tasks, CycleContext::new(1)).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[2].success);
    let err = results[1].error.as_deref().unwrap();
    assert!(err.contains("agent reported failure"), "got: {err}");
}

#[tokio::test]
async fn test_agent_error_recorded_per_task() {
    let pool = pool_with(Arc::new(FakeVcs::new()), Arc::new(FakeRunner::new()), 2);
    let results = pool
        .run_batch(vec![task(5, "triggers an error")], CycleContext::new(1))
        .await;
    assert!(!results[0].success);
    assert!(results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("agent run failed"));
}

#[tokio::test]
async fn test_no_changes_is_a_failure() {
    let vcs = Arc::new(FakeVcs::new());
    vcs.has_changes.store(false, Ordering::SeqCst);
    let pool = pool_with(Arc::clone(&vcs), Arc::new(FakeRunner::new()), 2);
    let results = pool
        .run_batch(vec![task(1, "noop change")], CycleContext::new(1))
        .await;
    assert!(!results[0].success);
    assert_eq!(
        results[0].error.as_deref(),
        Some("agent produced no changes")
    );
}

#[tokio::test]
async fn test_workspace_creation_failure_is_per_task() {
    let vcs = Arc::new(FakeVcs {
        fail_workspace_for: Some("auto/2-broken".to_string()),
        ..FakeVcs::new()
    });
    let pool = pool_with(vcs, Arc::new(FakeRunner::new()), 2);
    let tasks = vec![task(1, "fine"), task(2, "broken")];
    let results = pool.run_batch(tasks, CycleContext::new(1)).await;
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("workspace creation failed"));
}

#[tokio::test]
async fn test_push_failure_downgrades_success() {
    let vcs = Arc::new(FakeVcs::new());
    vcs.fail_push.store(true, Ordering::SeqCst);
    let pool = pool_with(Arc::clone(&vcs), Arc::new(FakeRunner::new()), 2);
    let results = pool
        .run_batch(vec![task(1, "good work, bad remote")], CycleContext::new(1))
        .await;
    assert!(!results[0].success);
    let err = results[0].error.as_deref().unwrap();
    assert!(err.contains("push failed"), "got: {err}");
}

#[tokio::test]
async fn test_concurrency_never_exceeds_worker_limit() {
    let runner = Arc::new(FakeRunner::with_delay(Duration::from_millis(30)));
    let pool = pool_with(Arc::new(FakeVcs::new()), Arc::clone(&runner), 2);
    let tasks = (1..=6).map(|i| task(i, "busy work")).collect();
    let results = pool.run_batch(tasks, CycleContext::new(1)).await;
    assert_eq!(results.len(), 6);
    assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_slow_agent_times_out() {
    let runner = Arc::new(FakeRunner::with_delay(Duration::from_secs(3600)));
    let pool = WorkerPool::new(Arc::new(FakeVcs::new()), runner, 1, 0, "main");
    let results = pool
        .run_batch(vec![task(1, "never finishes")], CycleContext::new(1))
        .await;
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("timed out"));
}
