use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::{filter_duplicates, order_by_conflict_risk, Deduplicator};
use crate::discovery::{DiscoveryRequest, TaskDiscovery};
use crate::executor::WorkerPool;
use crate::gateway::HostGateway;
use crate::merge::MergeResolver;
use crate::types::{
    CycleContext, CycleResult, HealthStatus, MergeCandidate, NewIssue, NewPullRequest,
    TrackedIssue, WorkerTask,
};

// ── Labels ───────────────────────────────────────────────────────────────

/// Worker currently owns the issue; excluded from the work queue.
pub const LABEL_IN_PROGRESS: &str = "in-progress";
/// Worker gave up; a human has to look before the daemon touches it again.
pub const LABEL_NEEDS_REVIEW: &str = "needs-review";
/// Branch pushed and PR open, waiting for the merge pass.
pub const LABEL_PR_PENDING: &str = "pr-pending";

// ── Daemon State ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Initializing,
    Running,
    Idle,
    Stopping,
    Stopped,
}

struct DispatchOutcome {
    candidates: Vec<MergeCandidate>,
    issue_by_branch: HashMap<String, u64>,
    completed: usize,
    failed: usize,
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Drives the five-step improvement cycle and owns the daemon lifecycle.
/// All cross-component coordination happens here; the collaborators never
/// talk to each other directly.
pub struct CycleOrchestrator {
    config: Arc<Config>,
    gateway: Arc<HostGateway>,
    discovery: Arc<dyn TaskDiscovery>,
    deduplicator: Deduplicator,
    pool: WorkerPool,
    resolver: MergeResolver,
    state: RwLock<DaemonState>,
    last_result: RwLock<Option<CycleResult>>,
    issue_cache: RwLock<Vec<TrackedIssue>>,
    cycle_counter: AtomicU64,
}

impl CycleOrchestrator {
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<HostGateway>,
        discovery: Arc<dyn TaskDiscovery>,
        pool: WorkerPool,
        resolver: MergeResolver,
    ) -> Self {
        let deduplicator = Deduplicator::new(config.discovery.similarity_threshold);
        Self {
            config,
            gateway,
            discovery,
            deduplicator,
            pool,
            resolver,
            state: RwLock::new(DaemonState::Initializing),
            last_result: RwLock::new(None),
            issue_cache: RwLock::new(Vec::new()),
            cycle_counter: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: DaemonState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn last_result(&self) -> Option<CycleResult> {
        self.last_result
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn gateway(&self) -> &HostGateway {
        &self.gateway
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Main daemon loop: run a cycle, publish its result, sleep until the
    /// next interval or until cancelled. Cancellation during the sleep is
    /// immediate; cancellation mid-cycle takes effect at the next boundary.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.config.daemon.loop_interval_ms);

        loop {
            self.set_state(DaemonState::Running);
            let cycle_id = self.cycle_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let ctx = CycleContext::new(cycle_id);
            info!(cycle_id, "cycle starting");

            let result = self.run_cycle(ctx).await;
            info!(
                cycle_id,
                discovered = result.tasks_discovered,
                completed = result.tasks_completed,
                failed = result.tasks_failed,
                merged = result.prs_merged,
                degraded = result.degraded,
                duration_ms = result.duration_ms,
                "cycle finished"
            );
            *self
                .last_result
                .write()
                .unwrap_or_else(|e| e.into_inner()) = Some(result);

            if self.config.daemon.single_cycle {
                break;
            }

            self.set_state(DaemonState::Idle);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        self.set_state(DaemonState::Stopping);
        info!("daemon loop exiting");
        self.set_state(DaemonState::Stopped);
    }

    // ── One Cycle ────────────────────────────────────────────────────────

    pub async fn run_cycle(&self, ctx: CycleContext) -> CycleResult {
        let started = std::time::Instant::now();
        let mut errors: Vec<String> = Vec::new();
        let mut degraded = false;

        // Step 1: current view of tracked issues. Never fails; on
        // degradation the previous cycle's listing stands in.
        let cached = self
            .issue_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let listing = self
            .gateway
            .list_open_issues_with_fallback(&self.config.discovery.issue_label, cached)
            .await;
        degraded |= listing.degraded;
        let mut issues = listing.value;
        if !listing.degraded {
            *self.issue_cache.write().unwrap_or_else(|e| e.into_inner()) = issues.clone();
        }
        info!(
            cycle_id = ctx.cycle_id,
            open_issues = issues.len(),
            cached = listing.degraded,
            "issue listing done"
        );

        // Step 2: discovery, unless the backlog is already full or this is
        // a dry run.
        let discovered = if self.config.daemon.dry_run {
            info!(cycle_id = ctx.cycle_id, "dry run, skipping discovery");
            0
        } else if issues.len() >= self.config.discovery.max_open_issues {
            info!(
                cycle_id = ctx.cycle_id,
                open_issues = issues.len(),
                cap = self.config.discovery.max_open_issues,
                "skipping discovery, backlog full"
            );
            0
        } else {
            match self
                .discover_and_file(&mut issues, ctx, &mut errors, &mut degraded)
                .await
            {
                Ok(count) => count,
                Err(message) => {
                    errors.push(message);
                    degraded = true;
                    0
                }
            }
        };

        // Step 3: work queue. Issues a worker or human already owns are
        // skipped; the rest run oldest-first, one batch per pool width.
        let queue: Vec<WorkerTask> = issues
            .iter()
            .filter(|i| {
                !i.has_label(LABEL_IN_PROGRESS)
                    && !i.has_label(LABEL_NEEDS_REVIEW)
                    && !i.has_label(LABEL_PR_PENDING)
            })
            .take(self.config.execution.parallel_workers)
            .cloned()
            .map(WorkerTask::for_issue)
            .collect();

        if self.config.daemon.dry_run {
            for task in &queue {
                info!(
                    cycle_id = ctx.cycle_id,
                    issue_id = task.issue.id,
                    branch = %task.branch_name,
                    "dry run, would dispatch"
                );
            }
            let service_health = self.gateway.service_health();
            return CycleResult {
                cycle_id: ctx.cycle_id,
                tasks_discovered: discovered,
                tasks_completed: 0,
                tasks_failed: 0,
                prs_merged: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                errors,
                degraded,
                service_health,
            };
        }

        // Step 4: dispatch the pool and turn successes into merge
        // candidates with open PRs.
        let DispatchOutcome {
            mut candidates,
            mut issue_by_branch,
            completed,
            failed,
        } = self.dispatch(queue, ctx, &mut errors, &mut degraded).await;
        for issue in issues.iter().filter(|i| i.has_label(LABEL_PR_PENDING)) {
            if issue_by_branch.values().any(|id| *id == issue.id) {
                continue;
            }
            let task = WorkerTask::for_issue(issue.clone());
            issue_by_branch.insert(task.branch_name.clone(), issue.id);
            candidates.push(MergeCandidate {
                branch_name: task.branch_name,
                pr_number: None,
            });
        }

        // Step 5: sequential merge pass.
        let merged = if self.config.merge.auto_merge && !candidates.is_empty() {
            self.merge_pass(candidates, &issue_by_branch, ctx, &mut errors)
                .await
        } else {
            0
        };

        let service_health = self.gateway.service_health();
        CycleResult {
            cycle_id: ctx.cycle_id,
            tasks_discovered: discovered,
            tasks_completed: completed,
            tasks_failed: failed,
            prs_merged: merged,
            duration_ms: started.elapsed().as_millis() as u64,
            errors,
            degraded,
            service_health,
        }
    }

    // ── Discovery ────────────────────────────────────────────────────────

    /// Ask the discovery collaborator for tasks, annotate them, and file
    /// the accepted ones as tracked issues. Returns the discovered count.
    async fn discover_and_file(
        &self,
        issues: &mut Vec<TrackedIssue>,
        ctx: CycleContext,
        errors: &mut Vec<String>,
        degraded: &mut bool,
    ) -> Result<usize, String> {
        let budget = self
            .config
            .discovery
            .max_open_issues
            .saturating_sub(issues.len());
        let request = DiscoveryRequest {
            repo_path: self.config.repo.repo_path.clone(),
            exclude_paths: self.config.discovery.exclude_paths.clone(),
            max_tasks: self.config.discovery.tasks_per_cycle.min(budget),
            existing_titles: issues.iter().map(|i| i.title.clone()).collect(),
        };

        let tasks = self
            .discovery
            .discover(&request, ctx)
            .await
            .map_err(|e| format!("discovery failed: {e}"))?;
        let discovered = tasks.len();
        info!(cycle_id = ctx.cycle_id, discovered, "discovery done");

        let queue = order_by_conflict_risk(filter_duplicates(
            self.deduplicator.annotate(tasks, issues),
        ));

        if self.gateway.service_health().status == HealthStatus::Unavailable {
            warn!(
                cycle_id = ctx.cycle_id,
                "hosting api unavailable, not filing issues"
            );
            *degraded = true;
            return Ok(discovered);
        }

        for entry in queue.into_iter().take(budget) {
            let new_issue = render_issue(&entry, &self.config.discovery.issue_label);
            match self.gateway.create_issue(&new_issue).await {
                Ok(issue) => {
                    info!(issue_id = issue.id, title = %issue.title, "issue filed");
                    issues.push(issue);
                }
                Err(e) => {
                    errors.push(e.to_string());
                }
            }
        }

        Ok(discovered)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    async fn dispatch(
        &self,
        queue: Vec<WorkerTask>,
        ctx: CycleContext,
        errors: &mut Vec<String>,
        degraded: &mut bool,
    ) -> DispatchOutcome {
        let mut issue_by_branch: HashMap<String, u64> = HashMap::new();
        if queue.is_empty() {
            return DispatchOutcome {
                candidates: Vec::new(),
                issue_by_branch,
                completed: 0,
                failed: 0,
            };
        }

        for task in &queue {
            let marked = self
                .gateway
                .add_labels_with_fallback(task.issue.id, &[LABEL_IN_PROGRESS.to_string()])
                .await;
            *degraded |= marked.degraded;
        }

        let results = self.pool.run_batch(queue, ctx).await;
        let mut candidates = Vec::new();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for result in results {
            if let Err(e) = self
                .gateway
                .remove_label(result.issue.id, LABEL_IN_PROGRESS)
                .await
            {
                warn!(issue_id = result.issue.id, error = %e, "in-progress label not removed");
            }

            if result.success {
                completed += 1;
                let pr_number = match self
                    .gateway
                    .create_pull_request(&NewPullRequest {
                        title: result.issue.title.clone(),
                        body: format!("Closes #{}.", result.issue.id),
                        head: result.branch_name.clone(),
                        base: self.config.repo.base_branch.clone(),
                    })
                    .await
                {
                    Ok(pr) => {
                        let note = self
                            .gateway
                            .add_comment_with_fallback(
                                result.issue.id,
                                &format!("Opened {} for this issue.", pr.html_url),
                            )
                            .await;
                        *degraded |= note.degraded;
                        Some(pr.number)
                    }
                    Err(e) => {
                        errors.push(e.to_string());
                        None
                    }
                };
                let marked = self
                    .gateway
                    .add_labels_with_fallback(result.issue.id, &[LABEL_PR_PENDING.to_string()])
                    .await;
                *degraded |= marked.degraded;

                issue_by_branch.insert(result.branch_name.clone(), result.issue.id);
                candidates.push(MergeCandidate {
                    branch_name: result.branch_name,
                    pr_number,
                });
            } else {
                failed += 1;
                let detail = result.error.unwrap_or_else(|| "unknown failure".to_string());
                errors.push(format!("worker [{}]: {detail}", result.branch_name));
                let marked = self
                    .gateway
                    .add_labels_with_fallback(result.issue.id, &[LABEL_NEEDS_REVIEW.to_string()])
                    .await;
                *degraded |= marked.degraded;
                let note = self
                    .gateway
                    .add_comment_with_fallback(
                        result.issue.id,
                        &format!("Automated attempt failed: {detail}"),
                    )
                    .await;
                *degraded |= note.degraded;
            }
        }

        DispatchOutcome {
            candidates,
            issue_by_branch,
            completed,
            failed,
        }
    }

    // ── Merge Pass ───────────────────────────────────────────────────────

    async fn merge_pass(
        &self,
        candidates: Vec<MergeCandidate>,
        issue_by_branch: &HashMap<String, u64>,
        ctx: CycleContext,
        errors: &mut Vec<String>,
    ) -> usize {
        let results = self.resolver.resolve(candidates, ctx);
        let mut merged = 0usize;

        for result in results {
            let issue_id = issue_by_branch.get(&result.branch_name).copied();
            if result.merged {
                merged += 1;
                if let Some(id) = issue_id {
                    let _ = self
                        .gateway
                        .add_comment_with_fallback(id, "Merged into the base branch.")
                        .await;
                    if let Err(e) = self.gateway.close_issue(id).await {
                        warn!(issue_id = id, error = %e, "merged issue not closed");
                        errors.push(e.to_string());
                    }
                }
            } else {
                let detail = result.error.unwrap_or_else(|| "unknown".to_string());
                errors.push(format!("merge [{}]: {detail}", result.branch_name));
                if let Some(id) = issue_id {
                    let _ = self
                        .gateway
                        .add_comment_with_fallback(
                            id,
                            &format!("Merge attempt failed, will retry next cycle: {detail}"),
                        )
                        .await;
                }
            }
        }

        merged
    }
}

/// Issue body for a filed task: description plus the structured fields the
/// discovery collaborator reported.
fn render_issue(entry: &crate::types::DeduplicatedTask, label: &str) -> NewIssue {
    let task = &entry.task;
    let mut body = task.description.clone();
    body.push_str(&format!(
        "\n\n**Category:** {}\n**Priority:** {}\n**Complexity:** {}\n",
        task.category, task.priority, task.estimated_complexity
    ));
    if !task.affected_paths.is_empty() {
        body.push_str("\n**Affected paths:**\n");
        for path in &task.affected_paths {
            body.push_str(&format!("- `{path}`\n"));
        }
    }
    if entry.conflict.has_high_conflict_risk {
        body.push_str("\n**Note:** predicted to overlap with another queued task.\n");
    }
    NewIssue {
        title: task.title.clone(),
        body,
        labels: vec![label.to_string()],
    }
}
