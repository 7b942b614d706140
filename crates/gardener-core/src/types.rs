use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Discovered Tasks ─────────────────────────────────────────────────────

/// An improvement task produced by the discovery collaborator.
/// Immutable once created; lives for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTask {
    pub title: String,
    pub description: String,
    /// Free-form category ("refactor", "test", "docs", ...).
    pub category: String,
    /// Priority 1 (highest) .. 5 (lowest).
    pub priority: u8,
    /// Rough complexity estimate ("low", "medium", "high").
    pub estimated_complexity: String,
    /// Repository paths this task is expected to touch.
    pub affected_paths: BTreeSet<String>,
    /// Already-tracked issues the discovery collaborator considers related.
    pub related_issue_ids: Vec<u64>,
}

/// Path-overlap prediction between tasks accepted in the same batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictPrediction {
    pub has_high_conflict_risk: bool,
    /// Intersection of `affected_paths` with at least one other batch task.
    pub overlapping_paths: BTreeSet<String>,
}

/// A discovered task annotated by the deduplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeduplicatedTask {
    pub task: DiscoveredTask,
    pub is_potential_duplicate: bool,
    pub conflict: ConflictPrediction,
}

// ── Tracked Issues ───────────────────────────────────────────────────────

/// An issue as tracked by the hosting API. The daemon only reads issues and
/// mutates labels/comments; it never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
}

impl TrackedIssue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// Payload for issue creation.
#[derive(Debug, Clone, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Payload for pull-request creation.
#[derive(Debug, Clone, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// A pull request as reported back by the hosting API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

// ── Worker Units ─────────────────────────────────────────────────────────

/// Unit of work submitted to the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub issue: TrackedIssue,
    pub branch_name: String,
}

impl WorkerTask {
    /// Branch name is derived deterministically from the issue, so the same
    /// issue always maps to the same workspace and re-derivation is safe.
    pub fn for_issue(issue: TrackedIssue) -> Self {
        let branch_name = derive_branch_name(issue.id, &issue.title);
        Self { issue, branch_name }
    }
}

/// Outcome of one worker execution. Produced exactly once per WorkerTask.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub issue: TrackedIssue,
    pub branch_name: String,
    pub success: bool,
    pub error: Option<String>,
}

// ── Merge Pipeline ───────────────────────────────────────────────────────

/// One branch queued for the sequential merge pass. The PR number is
/// attached by the orchestrator when PR creation succeeded.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub branch_name: String,
    pub pr_number: Option<u64>,
}

/// Per-candidate merge outcome, order-preserving with the candidate list.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub branch_name: String,
    pub merged: bool,
    pub pr_number: Option<u64>,
    pub error: Option<String>,
}

// ── Service Health ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Gateway-owned view of the hosting API's health, recomputed at cycle
/// boundaries and served by the monitoring endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub rate_limit_remaining: Option<u32>,
}

// ── Cycle Results ────────────────────────────────────────────────────────

/// Correlation values threaded explicitly through every component call
/// within one cycle (no process-wide correlation globals).
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
}

impl CycleContext {
    pub fn new(cycle_id: u64) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
        }
    }
}

/// The sole structured output of one cycle. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub cycle_id: u64,
    pub tasks_discovered: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub prs_merged: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub degraded: bool,
    pub service_health: ServiceHealth,
}

// ── Branch Naming ────────────────────────────────────────────────────────

const SLUG_MAX_LEN: usize = 40;

/// Derive the work branch for an issue: `auto/{id}-{slug}`, where the slug
/// is the lowercased title with non-alphanumeric runs collapsed to `-` and
/// truncated to 40 chars. Deterministic and unique per issue id.
pub fn derive_branch_name(issue_id: u64, title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
            if slug.len() >= SLUG_MAX_LEN {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(SLUG_MAX_LEN);
    let slug = slug.trim_matches('-');
    format!("auto/{issue_id}-{slug}")
}
