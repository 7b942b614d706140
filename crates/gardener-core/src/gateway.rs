use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::breaker::CircuitBreaker;
use crate::error::GardenerError;
use crate::types::{
    CircuitState, HealthStatus, NewIssue, NewPullRequest, PullRequest, ServiceHealth, TrackedIssue,
};

// ── Client Seam ──────────────────────────────────────────────────────────

/// One hosting-API reply plus whatever rate-limit budget the server reported
/// alongside it.
#[derive(Debug)]
pub struct ApiReply<T> {
    pub value: T,
    pub rate_limit_remaining: Option<u32>,
}

impl<T> ApiReply<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            rate_limit_remaining: None,
        }
    }
}

/// Raw hosting-API transport. Implementations do HTTP and nothing else;
/// breaker accounting and degradation live in [`HostGateway`].
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn list_open_issues(&self, label: &str) -> anyhow::Result<ApiReply<Vec<TrackedIssue>>>;
    async fn create_issue(&self, issue: &NewIssue) -> anyhow::Result<ApiReply<TrackedIssue>>;
    async fn add_labels(&self, issue_id: u64, labels: &[String]) -> anyhow::Result<ApiReply<()>>;
    async fn remove_label(&self, issue_id: u64, label: &str) -> anyhow::Result<ApiReply<()>>;
    async fn add_comment(&self, issue_id: u64, body: &str) -> anyhow::Result<ApiReply<()>>;
    async fn close_issue(&self, issue_id: u64) -> anyhow::Result<ApiReply<()>>;
    async fn create_pull_request(
        &self,
        pr: &NewPullRequest,
    ) -> anyhow::Result<ApiReply<PullRequest>>;
}

// ── Degraded Results ─────────────────────────────────────────────────────

/// Value from a fallback-capable gateway call. `degraded` is true when the
/// circuit was open or the call failed and a default stood in.
#[derive(Debug, Clone)]
pub struct Fallback<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Fallback<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn degraded(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Endpoint groups get independent breakers so a failing pulls endpoint does
/// not take issue reads down with it.
enum Group {
    Issues,
    Pulls,
}

/// All hosting-API traffic funnels through here. Strict methods surface
/// upstream errors; `_with_fallback` variants absorb them into a degraded
/// default so read paths keep the cycle alive.
pub struct HostGateway {
    client: Box<dyn HostClient>,
    issues: Mutex<CircuitBreaker>,
    pulls: Mutex<CircuitBreaker>,
    rate_limit: Mutex<Option<u32>>,
}

impl HostGateway {
    pub fn new(client: Box<dyn HostClient>) -> Self {
        Self {
            client,
            issues: Mutex::new(CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_COOLDOWN)),
            pulls: Mutex::new(CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_COOLDOWN)),
            rate_limit: Mutex::new(None),
        }
    }

    fn breaker(&self, group: Group) -> &Mutex<CircuitBreaker> {
        match group {
            Group::Issues => &self.issues,
            Group::Pulls => &self.pulls,
        }
    }

    fn check_allowed(&self, group: Group, endpoint: &'static str) -> Result<(), GardenerError> {
        let mut breaker = self.breaker(group).lock().unwrap_or_else(|e| e.into_inner());
        if breaker.allow(Instant::now()) {
            Ok(())
        } else {
            Err(GardenerError::upstream(endpoint, "circuit open"))
        }
    }

    fn settle<T>(
        &self,
        group: Group,
        endpoint: &'static str,
        outcome: anyhow::Result<ApiReply<T>>,
    ) -> Result<T, GardenerError> {
        let mut breaker = self.breaker(group).lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Ok(reply) => {
                breaker.record_success();
                if let Some(remaining) = reply.rate_limit_remaining {
                    *self.rate_limit.lock().unwrap_or_else(|e| e.into_inner()) = Some(remaining);
                }
                Ok(reply.value)
            }
            Err(e) => {
                breaker.record_failure(Instant::now());
                Err(GardenerError::upstream(endpoint, e.to_string()))
            }
        }
    }

    // ── Strict Calls ─────────────────────────────────────────────────────

    pub async fn list_open_issues(&self, label: &str) -> Result<Vec<TrackedIssue>, GardenerError> {
        self.check_allowed(Group::Issues, "issues.list")?;
        let outcome = self.client.list_open_issues(label).await;
        self.settle(Group::Issues, "issues.list", outcome)
    }

    pub async fn create_issue(&self, issue: &NewIssue) -> Result<TrackedIssue, GardenerError> {
        self.check_allowed(Group::Issues, "issues.create")?;
        let outcome = self.client.create_issue(issue).await;
        self.settle(Group::Issues, "issues.create", outcome)
    }

    pub async fn add_labels(
        &self,
        issue_id: u64,
        labels: &[String],
    ) -> Result<(), GardenerError> {
        self.check_allowed(Group::Issues, "issues.labels.add")?;
        let outcome = self.client.add_labels(issue_id, labels).await;
        self.settle(Group::Issues, "issues.labels.add", outcome)
    }

    pub async fn remove_label(&self, issue_id: u64, label: &str) -> Result<(), GardenerError> {
        self.check_allowed(Group::Issues, "issues.labels.remove")?;
        let outcome = self.client.remove_label(issue_id, label).await;
        self.settle(Group::Issues, "issues.labels.remove", outcome)
    }

    pub async fn add_comment(&self, issue_id: u64, body: &str) -> Result<(), GardenerError> {
        self.check_allowed(Group::Issues, "issues.comment")?;
        let outcome = self.client.add_comment(issue_id, body).await;
        self.settle(Group::Issues, "issues.comment", outcome)
    }

    pub async fn close_issue(&self, issue_id: u64) -> Result<(), GardenerError> {
        self.check_allowed(Group::Issues, "issues.close")?;
        let outcome = self.client.close_issue(issue_id).await;
        self.settle(Group::Issues, "issues.close", outcome)
    }

    pub async fn create_pull_request(
        &self,
        pr: &NewPullRequest,
    ) -> Result<PullRequest, GardenerError> {
        self.check_allowed(Group::Pulls, "pulls.create")?;
        let outcome = self.client.create_pull_request(pr).await;
        self.settle(Group::Pulls, "pulls.create", outcome)
    }

    // ── Fallback Calls ───────────────────────────────────────────────────

    /// Issue listing that never fails: an open circuit or upstream error
    /// hands back the caller's last known listing, marked degraded.
    pub async fn list_open_issues_with_fallback(
        &self,
        label: &str,
        last_known: Vec<TrackedIssue>,
    ) -> Fallback<Vec<TrackedIssue>> {
        match self.list_open_issues(label).await {
            Ok(issues) => Fallback::fresh(issues),
            Err(e) => {
                tracing::warn!(error = %e, "issue listing degraded to last known set");
                Fallback::degraded(last_known)
            }
        }
    }

    /// Label mutation that never fails; a miss is logged and reported as
    /// degraded so the cycle result records it.
    pub async fn add_labels_with_fallback(
        &self,
        issue_id: u64,
        labels: &[String],
    ) -> Fallback<()> {
        match self.add_labels(issue_id, labels).await {
            Ok(()) => Fallback::fresh(()),
            Err(e) => {
                tracing::warn!(issue_id, error = %e, "label add skipped");
                Fallback::degraded(())
            }
        }
    }

    pub async fn add_comment_with_fallback(&self, issue_id: u64, body: &str) -> Fallback<()> {
        match self.add_comment(issue_id, body).await {
            Ok(()) => Fallback::fresh(()),
            Err(e) => {
                tracing::warn!(issue_id, error = %e, "comment skipped");
                Fallback::degraded(())
            }
        }
    }

    // ── Health ───────────────────────────────────────────────────────────

    /// Snapshot of the breaker pair for the monitoring endpoint. Reported
    /// state is the worse of the two groups.
    pub fn service_health(&self) -> ServiceHealth {
        let now = Instant::now();
        let issues = self.issues.lock().unwrap_or_else(|e| e.into_inner());
        let pulls = self.pulls.lock().unwrap_or_else(|e| e.into_inner());

        let circuit_state = worse_state(issues.state(now), pulls.state(now));
        let consecutive_failures = issues
            .consecutive_failures()
            .max(pulls.consecutive_failures());
        let status = match circuit_state {
            CircuitState::Closed if consecutive_failures == 0 => HealthStatus::Healthy,
            CircuitState::Closed | CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unavailable,
        };

        ServiceHealth {
            status,
            circuit_state,
            consecutive_failures,
            rate_limit_remaining: *self.rate_limit.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

fn worse_state(a: CircuitState, b: CircuitState) -> CircuitState {
    fn rank(s: CircuitState) -> u8 {
        match s {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}
