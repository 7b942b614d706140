use async_trait::async_trait;

use crate::types::{CycleContext, TrackedIssue};

/// What a coding-agent run produced. `summary` is a one-line result suitable
/// for issue comments; `detail` carries the agent's full final message.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub summary: String,
    pub detail: String,
}

/// Seam between the worker pool and whatever coding agent does the actual
/// editing. Implementations run inside the issue's workspace and leave their
/// changes uncommitted; the pool owns committing and pushing.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        issue: &TrackedIssue,
        workspace: &str,
        base_branch: &str,
        ctx: CycleContext,
    ) -> anyhow::Result<AgentOutcome>;
}
