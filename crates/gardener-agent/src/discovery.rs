use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gardener_core::discovery::{DiscoveryRequest, TaskDiscovery};
use gardener_core::types::{CycleContext, DiscoveredTask};
use tracing::{info, warn};

use crate::claude::{read_only_tools, ClaudeRunner};
use crate::instruction::{build_discovery_instruction, extract_blocks, extract_field};

/// Agent-backed task discovery: one read-only exploration run over the
/// primary checkout, parsed into structured tasks.
pub struct AgentDiscovery {
    runner: Arc<ClaudeRunner>,
}

impl AgentDiscovery {
    pub fn new(runner: Arc<ClaudeRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TaskDiscovery for AgentDiscovery {
    async fn discover(
        &self,
        request: &DiscoveryRequest,
        ctx: CycleContext,
    ) -> Result<Vec<DiscoveredTask>> {
        let instruction = build_discovery_instruction(
            &request.exclude_paths,
            request.max_tasks,
            &request.existing_titles,
        );
        info!(cycle_id = ctx.cycle_id, repo = %request.repo_path, "running discovery scan");

        let stream = self
            .runner
            .run_prompt(&request.repo_path, &instruction, read_only_tools())
            .await?;
        if stream.is_error {
            return Err(anyhow!("discovery run reported an error"));
        }

        let mut tasks = parse_tasks(&stream.text);
        if tasks.len() > request.max_tasks {
            tasks.truncate(request.max_tasks);
        }
        info!(cycle_id = ctx.cycle_id, count = tasks.len(), "discovery scan parsed");
        Ok(tasks)
    }
}

pub fn parse_tasks(output: &str) -> Vec<DiscoveredTask> {
    let mut tasks = Vec::new();
    for block in extract_blocks(output, "TASK_START", "TASK_END") {
        let title = extract_field(&block, "Title:").unwrap_or_default();
        if title.is_empty() {
            warn!("discarding task block without a title");
            continue;
        }
        tasks.push(DiscoveredTask {
            title,
            description: extract_field(&block, "Description:").unwrap_or_default(),
            category: extract_field(&block, "Category:")
                .unwrap_or_else(|| "chore".to_string()),
            priority: parse_priority(extract_field(&block, "Priority:").as_deref()),
            estimated_complexity: extract_field(&block, "Complexity:")
                .unwrap_or_else(|| "medium".to_string()),
            affected_paths: parse_paths(extract_field(&block, "Paths:").as_deref()),
            related_issue_ids: parse_related(extract_field(&block, "Related:").as_deref()),
        });
    }
    tasks
}

fn parse_priority(raw: Option<&str>) -> u8 {
    raw.and_then(|v| v.trim().parse::<u8>().ok())
        .map_or(3, |p| p.clamp(1, 5))
}

fn parse_paths(raw: Option<&str>) -> BTreeSet<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .collect()
}

/// Pull issue numbers out of values like "#12, 34" or "none".
fn parse_related(raw: Option<&str>) -> Vec<u64> {
    raw.unwrap_or_default()
        .split(',')
        .filter_map(|part| {
            part.trim()
                .trim_start_matches('#')
                .parse::<u64>()
                .ok()
        })
        .collect()
}
