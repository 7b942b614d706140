use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::config::MergeMethod;

// ── Process Output ───────────────────────────────────────────────────────

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// How a local merge or rebase attempt ended. Conflicts are data, not
/// errors: the resolver decides what to do with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean,
    Conflict(String),
}

// ── Vcs Seam ─────────────────────────────────────────────────────────────

/// Everything the worker pool and merge resolver need from version control.
/// The concrete impl shells out to git; tests substitute a scripted fake.
pub trait RepoVcs: Send + Sync {
    /// Create a per-branch workspace rooted under the configured work dir,
    /// branched off `base`. Returns the workspace path.
    fn create_workspace(&self, branch: &str, base: &str) -> Result<String>;
    fn remove_workspace(&self, workspace: &str) -> Result<()>;

    /// Stage and commit everything in `workspace`. Returns false when there
    /// was nothing to commit.
    fn commit_all(&self, workspace: &str, message: &str) -> Result<bool>;
    /// Whether `branch` carries commits beyond `base`.
    fn has_new_commits(&self, workspace: &str, base: &str) -> Result<bool>;
    fn push_branch(&self, workspace: &str, branch: &str) -> Result<()>;

    fn fetch(&self) -> Result<()>;
    /// Merge `branch` into `base` in the primary checkout using `method`.
    fn merge_branch(&self, branch: &str, base: &str, method: MergeMethod) -> Result<MergeOutcome>;
    /// Rebase `branch` onto the current tip of `base`.
    fn rebase_branch(&self, branch: &str, base: &str) -> Result<MergeOutcome>;
    fn push_base(&self, base: &str) -> Result<()>;
    fn delete_branch(&self, branch: &str) -> Result<()>;
}

// ── Git Impl ─────────────────────────────────────────────────────────────

pub struct Git {
    repo_path: String,
    work_dir: String,
}

impl Git {
    pub fn new(repo_path: impl Into<String>, work_dir: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            work_dir: work_dir.into(),
        }
    }

    fn workspace_path(&self, branch: &str) -> String {
        // Branch names contain '/', which maps to nested directories.
        Path::new(&self.work_dir)
            .join(branch)
            .to_string_lossy()
            .into_owned()
    }

    fn exec(&self, dir: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    fn exec_ok(&self, dir: &str, args: &[&str]) -> Result<ExecResult> {
        let result = self.exec(dir, args)?;
        if !result.success() {
            return Err(anyhow!(
                "git {} failed in {dir}: {}",
                args.join(" "),
                result.combined_output()
            ));
        }
        Ok(result)
    }

    fn is_conflict(result: &ExecResult) -> bool {
        let out = result.combined_output();
        out.contains("CONFLICT") || out.contains("conflict")
    }
}

impl RepoVcs for Git {
    fn create_workspace(&self, branch: &str, base: &str) -> Result<String> {
        let ws = self.workspace_path(branch);
        if Path::new(&ws).exists() {
            // Stale workspace from an interrupted run; rebuild from scratch.
            let _ = self.exec(&self.repo_path, &["worktree", "remove", "--force", &ws]);
            let _ = self.exec(&self.repo_path, &["branch", "-D", branch]);
        }
        self.exec_ok(
            &self.repo_path,
            &["worktree", "add", &ws, "-b", branch, base],
        )?;
        Ok(ws)
    }

    fn remove_workspace(&self, workspace: &str) -> Result<()> {
        self.exec_ok(
            &self.repo_path,
            &["worktree", "remove", "--force", workspace],
        )?;
        Ok(())
    }

    fn commit_all(&self, workspace: &str, message: &str) -> Result<bool> {
        self.exec_ok(workspace, &["add", "-A"])?;
        let status = self.exec_ok(workspace, &["status", "--porcelain"])?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }
        self.exec_ok(workspace, &["commit", "-m", message])?;
        Ok(true)
    }

    fn has_new_commits(&self, workspace: &str, base: &str) -> Result<bool> {
        let result = self.exec_ok(workspace, &["rev-list", "--count", &format!("{base}..HEAD")])?;
        let count: u64 = result.stdout.trim().parse().unwrap_or(0);
        Ok(count > 0)
    }

    fn push_branch(&self, workspace: &str, branch: &str) -> Result<()> {
        self.exec_ok(workspace, &["push", "--force", "origin", branch])?;
        Ok(())
    }

    fn fetch(&self) -> Result<()> {
        self.exec_ok(&self.repo_path, &["fetch", "origin"])?;
        Ok(())
    }

    fn merge_branch(&self, branch: &str, base: &str, method: MergeMethod) -> Result<MergeOutcome> {
        self.exec_ok(&self.repo_path, &["checkout", base])?;

        let result = match method {
            MergeMethod::Merge => self.exec(&self.repo_path, &["merge", "--no-ff", branch])?,
            MergeMethod::Squash => {
                let squash = self.exec(&self.repo_path, &["merge", "--squash", branch])?;
                if squash.success() {
                    self.exec(
                        &self.repo_path,
                        &["commit", "-m", &format!("merge {branch}")],
                    )?
                } else {
                    squash
                }
            }
            MergeMethod::Rebase => {
                // Rebase the branch onto the base tip, then fast-forward.
                match self.rebase_branch(branch, base)? {
                    MergeOutcome::Conflict(detail) => {
                        return Ok(MergeOutcome::Conflict(detail));
                    }
                    MergeOutcome::Clean => {
                        self.exec_ok(&self.repo_path, &["checkout", base])?;
                        self.exec(&self.repo_path, &["merge", "--ff-only", branch])?
                    }
                }
            }
        };

        if result.success() {
            return Ok(MergeOutcome::Clean);
        }
        if Self::is_conflict(&result) {
            let _ = self.exec(&self.repo_path, &["merge", "--abort"]);
            let _ = self.exec(&self.repo_path, &["reset", "--hard", "HEAD"]);
            return Ok(MergeOutcome::Conflict(result.combined_output()));
        }
        Err(anyhow!(
            "git merge {branch} into {base} failed: {}",
            result.combined_output()
        ))
    }

    fn rebase_branch(&self, branch: &str, base: &str) -> Result<MergeOutcome> {
        self.exec_ok(&self.repo_path, &["checkout", branch])?;
        let result = self.exec(&self.repo_path, &["rebase", base])?;
        if result.success() {
            return Ok(MergeOutcome::Clean);
        }
        let _ = self.exec(&self.repo_path, &["rebase", "--abort"]);
        if Self::is_conflict(&result) {
            return Ok(MergeOutcome::Conflict(result.combined_output()));
        }
        Err(anyhow!(
            "git rebase {base} failed for {branch}: {}",
            result.combined_output()
        ))
    }

    fn push_base(&self, base: &str) -> Result<()> {
        self.exec_ok(&self.repo_path, &["push", "origin", base])?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let _ = self.exec(&self.repo_path, &["push", "origin", "--delete", branch]);
        self.exec_ok(&self.repo_path, &["branch", "-D", branch])?;
        Ok(())
    }
}
