use std::collections::HashMap;

use anyhow::Result;

use crate::error::GardenerError;

// ── Section Structs ──────────────────────────────────────────────────────

/// Target repository coordinates.
#[derive(Debug, Clone)]
pub struct RepoSettings {
    pub owner: String,
    pub name: String,
    pub base_branch: String,
    /// Local checkout the workers and merge resolver operate on.
    pub repo_path: String,
}

/// Worker-pool tuning.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub parallel_workers: usize,
    pub timeout_minutes: u64,
    /// Parent directory for per-branch workspaces.
    pub work_dir: String,
}

/// Task-discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Hard cap on open tracked issues; discovery is skipped at or above it.
    pub max_open_issues: usize,
    pub tasks_per_cycle: usize,
    pub exclude_paths: Vec<String>,
    /// Label identifying issues this daemon owns.
    pub issue_label: String,
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Report the conflict and move on.
    Abort,
    /// Abort the merge, rebase the branch onto the base tip, retry.
    RetryWithRebase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

/// Merge-resolver tuning.
#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub auto_merge: bool,
    pub max_retries: u32,
    pub conflict_strategy: ConflictStrategy,
    pub merge_method: MergeMethod,
}

/// Secrets. Env / .env / agent credentials file only, never the config DB of
/// any kind.
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub hosting_token: String,
    pub agent_oauth_token: String,
    pub agent_credentials_path: String,
}

/// Daemon loop and monitoring-endpoint settings.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub loop_interval_ms: u64,
    pub single_cycle: bool,
    pub dry_run: bool,
    pub web_bind: String,
    pub web_port: u16,
}

/// Full application configuration, grouped by concern.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo: RepoSettings,
    pub execution: ExecutionSettings,
    pub discovery: DiscoverySettings,
    pub merge: MergeSettings,
    pub credentials: CredentialSettings,
    pub daemon: DaemonSettings,
}

// ── Env Helpers ──────────────────────────────────────────────────────────

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_usize(key: &str, dotenv: &HashMap<String, String>, default: usize) -> usize {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_f64(key: &str, dotenv: &HashMap<String, String>, default: f64) -> f64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn resolve_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home, path.strip_prefix("~/").unwrap_or(path));
        }
    }
    path.to_string()
}

// ── Agent Credentials ────────────────────────────────────────────────────

pub fn read_oauth_from_credentials(path: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let v: serde_json::Value = serde_json::from_str(&contents).ok()?;
    // Try claudeAiOauth.accessToken first, then oauthToken at root
    v.get("claudeAiOauth")
        .and_then(|o| o.get("accessToken"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .or_else(|| {
            v.get("oauthToken")
                .and_then(|t| t.as_str())
                .map(str::to_string)
        })
}

fn read_oauth_expiry(path: &str) -> Option<i64> {
    let contents = std::fs::read_to_string(path).ok()?;
    let v: serde_json::Value = serde_json::from_str(&contents).ok()?;
    v.get("claudeAiOauth")
        .and_then(|o| o.get("expiresAt"))
        .and_then(|e| e.as_i64())
}

/// Refresh the agent OAuth token if expired or expiring within 5 minutes.
/// Runs `claude auth status` to trigger CLI-side refresh, then re-reads from
/// disk. Falls back to `current` if all else fails.
pub fn refresh_oauth_token(credentials_path: &str, current: &str) -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let expiry = read_oauth_expiry(credentials_path).unwrap_or(0);
    if expiry > 0 && expiry < now_ms + 300_000 {
        tracing::info!("agent OAuth token expired or near-expiry, refreshing via CLI");
        let _ = std::process::Command::new("claude")
            .args(["auth", "status"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }

    read_oauth_from_credentials(credentials_path)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| current.to_string())
}

// ── Parsing ──────────────────────────────────────────────────────────────

fn parse_conflict_strategy(raw: &str) -> ConflictStrategy {
    match raw {
        "abort" => ConflictStrategy::Abort,
        _ => ConflictStrategy::RetryWithRebase,
    }
}

fn parse_merge_method(raw: &str) -> MergeMethod {
    match raw {
        "merge" => MergeMethod::Merge,
        "rebase" => MergeMethod::Rebase,
        _ => MergeMethod::Squash,
    }
}

fn parse_exclude_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let home = std::env::var("HOME").unwrap_or_default();
        let default_credentials = format!("{}/.claude/.credentials.json", home);
        let credentials_path = get_str("AGENT_CREDENTIALS_PATH", &dotenv, &default_credentials);
        let credentials_path = resolve_tilde(&credentials_path);

        // OAuth token: env/dotenv first, then credentials file
        let agent_oauth_token = get("CLAUDE_CODE_OAUTH_TOKEN", &dotenv)
            .filter(|s| !s.is_empty())
            .or_else(|| read_oauth_from_credentials(&credentials_path))
            .unwrap_or_default();

        Ok(Config {
            repo: RepoSettings {
                owner: get_str("REPO_OWNER", &dotenv, ""),
                name: get_str("REPO_NAME", &dotenv, ""),
                base_branch: get_str("BASE_BRANCH", &dotenv, "main"),
                repo_path: resolve_tilde(&get_str("REPO_PATH", &dotenv, ".")),
            },
            execution: ExecutionSettings {
                parallel_workers: get_usize("PARALLEL_WORKERS", &dotenv, 3),
                timeout_minutes: get_u64("TIMEOUT_MINUTES", &dotenv, 30),
                work_dir: resolve_tilde(&get_str("WORK_DIR", &dotenv, ".gardener/work")),
            },
            discovery: DiscoverySettings {
                max_open_issues: get_usize("MAX_OPEN_ISSUES", &dotenv, 10),
                tasks_per_cycle: get_usize("TASKS_PER_CYCLE", &dotenv, 3),
                exclude_paths: parse_exclude_paths(&get_str("EXCLUDE_PATHS", &dotenv, "")),
                issue_label: get_str("ISSUE_LABEL", &dotenv, "gardener"),
                similarity_threshold: get_f64("SIMILARITY_THRESHOLD", &dotenv, 0.7),
            },
            merge: MergeSettings {
                auto_merge: get_bool("AUTO_MERGE", &dotenv, true),
                max_retries: get_u32("MERGE_MAX_RETRIES", &dotenv, 2),
                conflict_strategy: parse_conflict_strategy(&get_str(
                    "CONFLICT_STRATEGY",
                    &dotenv,
                    "rebase",
                )),
                merge_method: parse_merge_method(&get_str("MERGE_METHOD", &dotenv, "squash")),
            },
            credentials: CredentialSettings {
                hosting_token: get_str("HOSTING_TOKEN", &dotenv, ""),
                agent_oauth_token,
                agent_credentials_path: credentials_path,
            },
            daemon: DaemonSettings {
                loop_interval_ms: get_u64("LOOP_INTERVAL_MS", &dotenv, 300_000),
                single_cycle: get_bool("SINGLE_CYCLE", &dotenv, false),
                dry_run: get_bool("DRY_RUN", &dotenv, false),
                web_bind: get_str("WEB_BIND", &dotenv, "127.0.0.1"),
                web_port: get_u16("WEB_PORT", &dotenv, 3141),
            },
        })
    }

    /// Startup validation: anything wrong here is fatal.
    pub fn validate(&self) -> std::result::Result<(), GardenerError> {
        if self.credentials.hosting_token.is_empty() {
            return Err(GardenerError::config("HOSTING_TOKEN is not set"));
        }
        if self.repo.owner.is_empty() || self.repo.name.is_empty() {
            return Err(GardenerError::config("REPO_OWNER / REPO_NAME are not set"));
        }
        if self.execution.parallel_workers == 0 {
            return Err(GardenerError::config("PARALLEL_WORKERS must be at least 1"));
        }
        std::fs::create_dir_all(&self.execution.work_dir).map_err(|e| {
            GardenerError::config(format!(
                "work dir {} is not creatable: {e}",
                self.execution.work_dir
            ))
        })?;
        Ok(())
    }
}
