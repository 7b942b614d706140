use std::sync::Arc;

use crate::config::{ConflictStrategy, MergeSettings};
use crate::git::{MergeOutcome, RepoVcs};
use crate::types::{CycleContext, MergeCandidate, MergeResult};

/// Merges finished branches into the base branch one at a time. Sequential
/// on purpose: each merge moves the base tip, and later branches must land
/// on the updated tip or conflict honestly.
pub struct MergeResolver {
    vcs: Arc<dyn RepoVcs>,
    settings: MergeSettings,
    base_branch: String,
}

impl MergeResolver {
    pub fn new(
        vcs: Arc<dyn RepoVcs>,
        settings: MergeSettings,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            settings,
            base_branch: base_branch.into(),
        }
    }

    /// Process the candidate list in order. One failed branch is recorded
    /// and skipped; the rest of the sequence still runs.
    pub fn resolve(&self, candidates: Vec<MergeCandidate>, ctx: CycleContext) -> Vec<MergeResult> {
        if let Err(e) = self.vcs.fetch() {
            tracing::warn!(cycle_id = ctx.cycle_id, error = %e, "fetch before merge pass failed");
        }

        candidates
            .into_iter()
            .map(|candidate| {
                let MergeCandidate {
                    branch_name,
                    pr_number,
                } = candidate;
                match self.merge_one(&branch_name, ctx) {
                    Ok(()) => MergeResult {
                        branch_name,
                        merged: true,
                        pr_number,
                        error: None,
                    },
                    Err(message) => {
                        tracing::warn!(
                            cycle_id = ctx.cycle_id,
                            branch = %branch_name,
                            error = %message,
                            "merge failed, branch left open"
                        );
                        MergeResult {
                            branch_name,
                            merged: false,
                            pr_number,
                            error: Some(message),
                        }
                    }
                }
            })
            .collect()
    }

    fn merge_one(&self, branch: &str, ctx: CycleContext) -> Result<(), String> {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .vcs
                .merge_branch(branch, &self.base_branch, self.settings.merge_method)
                .map_err(|e| format!("merge error: {e}"))?;

            match outcome {
                MergeOutcome::Clean => break,
                MergeOutcome::Conflict(detail) => {
                    if self.settings.conflict_strategy == ConflictStrategy::Abort {
                        return Err(format!("conflict: {}", first_line(&detail)));
                    }
                    if attempt >= self.settings.max_retries {
                        return Err(format!(
                            "conflict persisted after {attempt} rebase retries: {}",
                            first_line(&detail)
                        ));
                    }
                    attempt += 1;
                    tracing::info!(
                        cycle_id = ctx.cycle_id,
                        branch = %branch,
                        attempt,
                        "merge conflict, rebasing onto base tip"
                    );
                    match self
                        .vcs
                        .rebase_branch(branch, &self.base_branch)
                        .map_err(|e| format!("rebase error: {e}"))?
                    {
                        MergeOutcome::Clean => continue,
                        MergeOutcome::Conflict(rebase_detail) => {
                            return Err(format!(
                                "rebase conflict: {}",
                                first_line(&rebase_detail)
                            ));
                        }
                    }
                }
            }
        }

        self.vcs
            .push_base(&self.base_branch)
            .map_err(|e| format!("push of base branch failed: {e}"))?;
        if let Err(e) = self.vcs.delete_branch(branch) {
            tracing::warn!(branch = %branch, error = %e, "merged branch not deleted");
        }
        Ok(())
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
}
