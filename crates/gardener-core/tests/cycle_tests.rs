use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gardener_core::agent::{AgentOutcome, AgentRunner};
use gardener_core::config::{
    Config, ConflictStrategy, CredentialSettings, DaemonSettings, DiscoverySettings,
    ExecutionSettings, MergeMethod, MergeSettings, RepoSettings,
};
use gardener_core::cycle::CycleOrchestrator;
use gardener_core::discovery::{DiscoveryRequest, TaskDiscovery};
use gardener_core::executor::WorkerPool;
use gardener_core::gateway::{ApiReply, HostClient, HostGateway};
use gardener_core::git::{MergeOutcome, RepoVcs};
use gardener_core::merge::MergeResolver;
use gardener_core::types::{
    CycleContext, DiscoveredTask, NewIssue, NewPullRequest, PullRequest, TrackedIssue,
};

// ── Fake Hosting Client ──────────────────────────────────────────────────

#[derive(Default)]
struct HostLog {
    labels_added: Vec<(u64, String)>,
    labels_removed: Vec<(u64, String)>,
    comments: Vec<(u64, String)>,
    issues_created: Vec<NewIssue>,
    issues_closed: Vec<u64>,
    prs_created: Vec<NewPullRequest>,
}

struct FakeHost {
    issues: Vec<TrackedIssue>,
    fail_listing: AtomicBool,
    next_issue_id: AtomicU64,
    log: Mutex<HostLog>,
}

impl FakeHost {
    fn with_issues(issues: Vec<TrackedIssue>) -> Arc<Self> {
        Arc::new(Self {
            issues,
            fail_listing: AtomicBool::new(false),
            next_issue_id: AtomicU64::new(100),
            log: Mutex::new(HostLog::default()),
        })
    }
}

#[async_trait]
impl HostClient for FakeHost {
    async fn list_open_issues(&self, _label: &str) -> anyhow::Result<ApiReply<Vec<TrackedIssue>>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("502 bad gateway");
        }
        Ok(ApiReply::new(self.issues.clone()))
    }

    async fn create_issue(&self, issue: &NewIssue) -> anyhow::Result<ApiReply<TrackedIssue>> {
        let id = self.next_issue_id.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().issues_created.push(issue.clone());
        Ok(ApiReply::new(TrackedIssue {
            id,
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.labels.iter().cloned().collect(),
        }))
    }

    async fn add_labels(&self, issue_id: u64, labels: &[String]) -> anyhow::Result<ApiReply<()>> {
        let mut log = self.log.lock().unwrap();
        for label in labels {
            log.labels_added.push((issue_id, label.clone()));
        }
        Ok(ApiReply::new(()))
    }

    async fn remove_label(&self, issue_id: u64, label: &str) -> anyhow::Result<ApiReply<()>> {
        self.log
            .lock()
            .unwrap()
            .labels_removed
            .push((issue_id, label.to_string()));
        Ok(ApiReply::new(()))
    }

    async fn add_comment(&self, issue_id: u64, body: &str) -> anyhow::Result<ApiReply<()>> {
        self.log
            .lock()
            .unwrap()
            .comments
            .push((issue_id, body.to_string()));
        Ok(ApiReply::new(()))
    }

    async fn close_issue(&self, issue_id: u64) -> anyhow::Result<ApiReply<()>> {
        self.log.lock().unwrap().issues_closed.push(issue_id);
        Ok(ApiReply::new(()))
    }

    async fn create_pull_request(
        &self,
        pr: &NewPullRequest,
    ) -> anyhow::Result<ApiReply<PullRequest>> {
        self.log.lock().unwrap().prs_created.push(pr.clone());
        Ok(ApiReply::new(PullRequest {
            number: 42,
            html_url: "https://example.test/pull/42".to_string(),
        }))
    }
}

/// Hands the gateway a shared handle so tests keep access to the call log.
struct SharedHost(Arc<FakeHost>);

#[async_trait]
impl HostClient for SharedHost {
    async fn list_open_issues(&self, label: &str) -> anyhow::Result<ApiReply<Vec<TrackedIssue>>> {
        self.0.list_open_issues(label).await
    }

    async fn create_issue(&self, issue: &NewIssue) -> anyhow::Result<ApiReply<TrackedIssue>> {
        self.0.create_issue(issue).await
    }

    async fn add_labels(&self, issue_id: u64, labels: &[String]) -> anyhow::Result<ApiReply<()>> {
        self.0.add_labels(issue_id, labels).await
    }

    async fn remove_label(&self, issue_id: u64, label: &str) -> anyhow::Result<ApiReply<()>> {
        self.0.remove_label(issue_id, label).await
    }

    async fn add_comment(&self, issue_id: u64, body: &str) -> anyhow::Result<ApiReply<()>> {
        self.0.add_comment(issue_id, body).await
    }

    async fn close_issue(&self, issue_id: u64) -> anyhow::Result<ApiReply<()>> {
        self.0.close_issue(issue_id).await
    }

    async fn create_pull_request(
        &self,
        pr: &NewPullRequest,
    ) -> anyhow::Result<ApiReply<PullRequest>> {
        self.0.create_pull_request(pr).await
    }
}

// ── Other Fakes ──────────────────────────────────────────────────────────

struct FakeDiscovery {
    tasks: Vec<DiscoveredTask>,
    invoked: AtomicBool,
}

impl FakeDiscovery {
    fn with_tasks(tasks: Vec<DiscoveredTask>) -> Arc<Self> {
        Arc::new(Self {
            tasks,
            invoked: AtomicBool::new(false),
        })
    }

    fn none() -> Arc<Self> {
        Self::with_tasks(Vec::new())
    }
}

#[async_trait]
impl TaskDiscovery for FakeDiscovery {
    async fn discover(
        &self,
        _request: &DiscoveryRequest,
        _ctx: CycleContext,
    ) -> anyhow::Result<Vec<DiscoveredTask>> {
        self.invoked.store(true, Ordering::SeqCst);
        Ok(self.tasks.clone())
    }
}

struct FakeVcs;

impl RepoVcs for FakeVcs {
    fn create_workspace(&self, branch: &str, _base: &str) -> anyhow::Result<String> {
        Ok(format!("/tmp/{branch}"))
    }

    fn remove_workspace(&self, _workspace: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit_all(&self, _workspace: &str, _message: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn has_new_commits(&self, _workspace: &str, _base: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn push_branch(&self, _workspace: &str, _branch: &str) -> anyhow::Result<()> {
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

/// Succeeds unless the issue title contains "fail".
struct FakeRunner;

#[async_trait]
impl AgentRunner for FakeRunner {
    async fn run(
        &self,
        issue: &TrackedIssue,
        _workspace: &str,
        _base_branch: &str,
        _ctx: CycleContext,
    ) -> anyhow::Result<AgentOutcome> {
        if issue.title.contains("fail") {
            return Ok(AgentOutcome {
                success: false,
                summary: "gave up".to_string(),
                detail: String::new(),
            });
        }
        Ok(AgentOutcome {
            success: true,
            summary: "done".to_string(),
            detail: String::new(),
        })
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn test_config(max_open_issues: usize, dry_run: bool) -> Arc<Config> {
    Arc::new(Config {
        repo: RepoSettings {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            base_branch: "main".to_string(),
            repo_path: "/tmp/repo".to_string(),
        },
        execution: ExecutionSettings {
            parallel_workers: 2,
            timeout_minutes: 10,
            work_dir: "/tmp/work".to_string(),
        },
        discovery: DiscoverySettings {
            max_open_issues,
            tasks_per_cycle: 3,
            exclude_paths: Vec::new(),
            issue_label: "gardener".to_string(),
            similarity_threshold: 0.7,
        },
        merge: MergeSettings {
            auto_merge: true,
            max_retries: 2,
            conflict_strategy: ConflictStrategy::RetryWithRebase,
            merge_method: MergeMethod::Squash,
        },
        credentials: CredentialSettings {
            hosting_token: "token".to_string(),
            agent_oauth_token: String::new(),
            agent_credentials_path: String::new(),
        },
        daemon: DaemonSettings {
            loop_interval_ms: 1000,
            single_cycle: true,
            dry_run,
            web_bind: "127.0.0.1".to_string(),
            web_port: 0,
        },
    })
}

fn orchestrator(
    config: Arc<Config>,
    host: Arc<FakeHost>,
    discovery: Arc<FakeDiscovery>,
) -> CycleOrchestrator {
    let gateway = Arc::new(HostGateway::new(Box::new(SharedHost(host))));
    let vcs: Arc<dyn RepoVcs> = Arc::new(FakeVcs);
    let pool = WorkerPool::new(
        Arc::clone(&vcs),
        Arc::new(FakeRunner),
        config.execution.parallel_workers,
        config.execution.timeout_minutes,
        &config.repo.base_branch,
    );
    let resolver = MergeResolver::new(Arc::clone(&vcs), config.merge.clone(), &config.repo.base_branch);
    CycleOrchestrator::new(config, gateway, discovery, pool, resolver)
}

fn issue(id: u64, title: &str, labels: &[&str]) -> TrackedIssue {
    TrackedIssue {
        id,
        title: title.to_string(),
        body: String::new(),
        labels: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
    }
}

fn discovered(title: &str) -> DiscoveredTask {
    DiscoveredTask {
        title: title.to_string(),
        description: "details".to_string(),
        category: "refactor".to_string(),
        priority: 3,
        estimated_complexity: "low".to_string(),
        affected_paths: BTreeSet::new(),
        related_issue_ids: Vec::new(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_happy_path_dispatches_opens_pr_and_merges() {
    let host = FakeHost::with_issues(vec![issue(1, "Tidy the parser", &[])]);
    let orch = orchestrator(test_config(1, false), Arc::clone(&host), FakeDiscovery::none());

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_completed, 1);
    assert_eq!(result.tasks_failed, 0);
    assert_eq!(result.prs_merged, 1);
    assert!(result.errors.is_empty());
    assert!(!result.degraded);

    let log = host.log.lock().unwrap();
    assert!(log.labels_added.contains(&(1, "in-progress".to_string())));
    assert!(log.labels_removed.contains(&(1, "in-progress".to_string())));
    assert!(log.labels_added.contains(&(1, "pr-pending".to_string())));
    assert_eq!(log.prs_created.len(), 1);
    assert_eq!(log.prs_created[0].head, "auto/1-tidy-the-parser");
    assert_eq!(log.prs_created[0].base, "main");
    assert_eq!(log.issues_closed, vec![1]);
}

#[tokio::test]
async fn test_discovery_files_issues_and_they_join_the_queue() {
    let host = FakeHost::with_issues(Vec::new());
    let discovery = FakeDiscovery::with_tasks(vec![
        discovered("Add parser benchmarks"),
        discovered("Document the wire format"),
    ]);
    let orch = orchestrator(test_config(10, false), Arc::clone(&host), discovery);

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_discovered, 2);
    assert_eq!(result.tasks_completed, 2);
    let log = host.log.lock().unwrap();
    assert_eq!(log.issues_created.len(), 2);
    assert!(log.issues_created[0].labels.contains(&"gardener".to_string()));
    assert!(log.issues_created[0].body.contains("**Category:** refactor"));
}

#[tokio::test]
async fn test_full_backlog_skips_discovery() {
    let host = FakeHost::with_issues(vec![issue(1, "Old task", &["needs-review"])]);
    let discovery = FakeDiscovery::with_tasks(vec![discovered("Should not be asked")]);
    let orch = orchestrator(test_config(1, false), host, Arc::clone(&discovery));

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_discovered, 0);
    assert!(!discovery.invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_degraded_listing_reuses_previous_cycle_and_marks_result() {
    let host = FakeHost::with_issues(vec![issue(1, "Tidy the parser", &[])]);
    let orch = orchestrator(test_config(1, false), Arc::clone(&host), FakeDiscovery::none());

    let first = orch.run_cycle(CycleContext::new(1)).await;
    assert!(!first.degraded);
    assert_eq!(first.tasks_completed, 1);

    // Listing now fails, but the cycle keeps going on the cached view.
    host.fail_listing.store(true, Ordering::SeqCst);
    let second = orch.run_cycle(CycleContext::new(2)).await;

    assert!(second.degraded);
    assert_eq!(second.tasks_completed, 1);
    let log = host.log.lock().unwrap();
    assert_eq!(log.prs_created.len(), 2);
}

#[tokio::test]
async fn test_unavailable_host_blocks_issue_filing_but_not_discovery() {
    let host = FakeHost::with_issues(Vec::new());
    host.fail_listing.store(true, Ordering::SeqCst);
    let discovery = FakeDiscovery::with_tasks(vec![discovered("Found while degraded")]);
    let orch = orchestrator(test_config(10, false), Arc::clone(&host), Arc::clone(&discovery));

    // Trip the issues breaker before the cycle starts.
    for _ in 0..3 {
        let _ = orch.gateway().list_open_issues("gardener").await;
    }

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert!(result.degraded);
    assert_eq!(result.tasks_discovered, 1);
    assert!(discovery.invoked.load(Ordering::SeqCst));
    assert!(host.log.lock().unwrap().issues_created.is_empty());
}

#[tokio::test]
async fn test_duplicate_task_is_not_filed() {
    let host = FakeHost::with_issues(vec![issue(
        1,
        "Refactor the config loader module",
        &["needs-review"],
    )]);
    let mut dup = discovered("Refactor the config loader");
    dup.description = String::new();
    let discovery = FakeDiscovery::with_tasks(vec![dup]);
    let orch = orchestrator(test_config(10, false), Arc::clone(&host), discovery);

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_discovered, 1);
    assert!(host.log.lock().unwrap().issues_created.is_empty());
}

#[tokio::test]
async fn test_dry_run_mutates_nothing() {
    let host = FakeHost::with_issues(vec![issue(1, "Tidy the parser", &[])]);
    let discovery = FakeDiscovery::with_tasks(vec![discovered("Brand new task")]);
    let orch = orchestrator(test_config(10, true), Arc::clone(&host), Arc::clone(&discovery));

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_discovered, 0);
    assert!(!discovery.invoked.load(Ordering::SeqCst));
    assert_eq!(result.tasks_completed, 0);
    assert_eq!(result.prs_merged, 0);
    let log = host.log.lock().unwrap();
    assert!(log.issues_created.is_empty());
    assert!(log.labels_added.is_empty());
    assert!(log.prs_created.is_empty());
}

#[tokio::test]
async fn test_worker_failure_labels_needs_review() {
    let host = FakeHost::with_issues(vec![issue(3, "Doomed to fail", &[])]);
    let orch = orchestrator(test_config(1, false), Arc::clone(&host), FakeDiscovery::none());

    let result = orch.run_cycle(CycleContext::new(1)).await;

    assert_eq!(result.tasks_completed, 0);
    assert_eq!(result.tasks_failed, 1);
    assert!(result.errors.iter().any(|e| e.starts_with("worker [")));
    let log = host.log.lock().unwrap();
    assert!(log.labels_added.contains(&(3, "needs-review".to_string())));
    assert!(log
        .comments
        .iter()
        .any(|(id, body)| *id == 3 && body.starts_with("Automated attempt failed")));
    assert!(log.prs_created.is_empty());
    assert!(log.issues_closed.is_empty());
}

#[tokio::test]
async fn test_single_cycle_daemon_runs_once_and_stops() {
    use gardener_core::cycle::DaemonState;
    use tokio_util::sync::CancellationToken;

    let host = FakeHost::with_issues(Vec::new());
    let orch = orchestrator(test_config(1, false), host, FakeDiscovery::none());

    orch.run(CancellationToken::new()).await;

    assert_eq!(orch.state(), DaemonState::Stopped);
    let last = orch.last_result().unwrap();
    assert_eq!(last.cycle_id, 1);
}

#[tokio::test]
async fn test_pr_pending_issue_reenters_merge_pass() {
    let host = FakeHost::with_issues(vec![issue(11, "Improve error messages", &["pr-pending"])]);
    let orch = orchestrator(test_config(1, false), Arc::clone(&host), FakeDiscovery::none());

    let result = orch.run_cycle(CycleContext::new(1)).await;

    // No worker ran, but the leftover branch merged and closed its issue.
    assert_eq!(result.tasks_completed, 0);
    assert_eq!(result.prs_merged, 1);
    let log = host.log.lock().unwrap();
    assert_eq!(log.issues_closed, vec![11]);
    assert!(log
        .comments
        .iter()
        .any(|(id, body)| *id == 11 && body.contains("Merged")));
}
