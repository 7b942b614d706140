use async_trait::async_trait;

use crate::types::{CycleContext, DiscoveredTask};

/// Inputs the discovery collaborator needs to scan a repository for
/// improvement work.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub repo_path: String,
    pub exclude_paths: Vec<String>,
    pub max_tasks: usize,
    /// Titles of already-tracked issues, passed so the collaborator can
    /// steer away from re-proposing them.
    pub existing_titles: Vec<String>,
}

/// Seam for the task-discovery collaborator. Implementations may call an
/// agent, a static analyzer, or anything else that yields tasks.
#[async_trait]
pub trait TaskDiscovery: Send + Sync {
    async fn discover(
        &self,
        request: &DiscoveryRequest,
        ctx: CycleContext,
    ) -> anyhow::Result<Vec<DiscoveredTask>>;
}
