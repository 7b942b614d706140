use anyhow::{Context, Result};
use async_trait::async_trait;
use gardener_core::agent::{AgentOutcome, AgentRunner};
use gardener_core::config::refresh_oauth_token;
use gardener_core::types::{CycleContext, TrackedIssue};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::event::{summarize_stream, StreamSummary};
use crate::instruction::build_worker_instruction;

const EDIT_TOOLS: &str = "Read,Glob,Grep,Write,Edit,Bash";
const READ_TOOLS: &str = "Read,Glob,Grep,Bash";
const MAX_TURNS: &str = "200";

/// Runs the `claude` CLI as a subprocess and turns its NDJSON stream into
/// an outcome. One instance is shared by all workers and by discovery.
pub struct ClaudeRunner {
    claude_bin: String,
    credentials_path: String,
    oauth_token: String,
}

impl ClaudeRunner {
    pub fn new(
        claude_bin: impl Into<String>,
        credentials_path: impl Into<String>,
        oauth_token: impl Into<String>,
    ) -> Self {
        Self {
            claude_bin: claude_bin.into(),
            credentials_path: credentials_path.into(),
            oauth_token: oauth_token.into(),
        }
    }

    /// Spawn the CLI in `dir`, stream its output to completion and summarize
    /// it. The process is killed if the future is dropped, so a pool-level
    /// timeout also stops the subprocess.
    pub async fn run_prompt(
        &self,
        dir: &str,
        instruction: &str,
        allowed_tools: &str,
    ) -> Result<StreamSummary> {
        let oauth_token = refresh_oauth_token(&self.credentials_path, &self.oauth_token);

        let mut child = Command::new(&self.claude_bin)
            .args([
                "--output-format",
                "stream-json",
                "--verbose",
                "--allowedTools",
                allowed_tools,
                "--max-turns",
                MAX_TURNS,
                "--print",
                instruction,
            ])
            .kill_on_drop(true)
            .current_dir(dir)
            .env("CLAUDE_CODE_OAUTH_TOKEN", &oauth_token)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn agent CLI: {}", self.claude_bin))?;

        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;

        let mut raw_stream = String::new();
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line.context("error reading agent stdout")? {
                        Some(l) => {
                            raw_stream.push_str(&l);
                            raw_stream.push('\n');
                        }
                        None => break,
                    }
                }
                line = stderr_reader.next_line() => {
                    if let Ok(Some(l)) = line {
                        if !l.is_empty() {
                            warn!("agent stderr: {l}");
                        }
                    }
                }
            }
        }
        while let Ok(Some(l)) = stderr_reader.next_line().await {
            if !l.is_empty() {
                warn!("agent stderr: {l}");
            }
        }

        let status = child.wait().await.context("failed to wait for agent CLI")?;
        let mut summary = summarize_stream(&raw_stream);
        if !status.success() {
            summary.is_error = true;
        }
        Ok(summary)
    }
}

#[async_trait]
impl AgentRunner for ClaudeRunner {
    async fn run(
        &self,
        issue: &TrackedIssue,
        workspace: &str,
        base_branch: &str,
        ctx: CycleContext,
    ) -> Result<AgentOutcome> {
        let instruction = build_worker_instruction(issue, base_branch);
        info!(
            cycle_id = ctx.cycle_id,
            issue_id = issue.id,
            "spawning agent subprocess"
        );

        let stream = self.run_prompt(workspace, &instruction, EDIT_TOOLS).await?;
        let failed_marker = stream.text.trim_start().starts_with("FAILED:");
        let success = !stream.is_error && !failed_marker;
        let summary = stream
            .text
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no output")
            .trim()
            .to_string();

        info!(
            cycle_id = ctx.cycle_id,
            issue_id = issue.id,
            success,
            output_len = stream.text.len(),
            "agent subprocess finished"
        );

        Ok(AgentOutcome {
            success,
            summary,
            detail: stream.text,
        })
    }
}

/// Tool allow-list for read-only exploration runs.
pub fn read_only_tools() -> &'static str {
    READ_TOOLS
}
