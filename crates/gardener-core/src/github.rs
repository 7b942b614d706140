use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::gateway::{ApiReply, HostClient};
use crate::types::{NewIssue, NewPullRequest, PullRequest, TrackedIssue};

const BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("gardener/", env!("CARGO_PKG_VERSION"));

// ── Wire Shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<WireLabel>,
    /// Present on pull requests returned by the issues endpoint; used to
    /// filter them out of issue listings.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl WireIssue {
    fn into_tracked(self) -> TrackedIssue {
        TrackedIssue {
            id: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self
                .labels
                .into_iter()
                .map(|l| l.name)
                .collect::<BTreeSet<_>>(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePull {
    number: u64,
    html_url: String,
}

// ── Client ───────────────────────────────────────────────────────────────

/// GitHub REST v3 transport. Owns no retry or breaker logic; the gateway
/// wraps every call.
pub struct GithubClient {
    http: reqwest::Client,
    owner: String,
    repo: String,
    token: String,
}

impl GithubClient {
    pub fn new(owner: &str, repo: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{BASE}/repos/{}/{}/{tail}", self.owner, self.repo)
    }

    fn decorate(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<(reqwest::Response, Option<u32>)> {
        let resp = self.decorate(req).send().await?;
        let remaining = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let resp = resp.error_for_status()?;
        Ok((resp, remaining))
    }
}

#[async_trait]
impl HostClient for GithubClient {
    async fn list_open_issues(&self, label: &str) -> Result<ApiReply<Vec<TrackedIssue>>> {
        let url = format!(
            "{}?state=open&labels={}&per_page=100",
            self.url("issues"),
            urlencoding::encode(label)
        );
        let (resp, remaining) = self.execute(self.http.get(&url)).await?;
        let wire: Vec<WireIssue> = resp.json().await.context("decode issue list")?;
        let issues = wire
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(WireIssue::into_tracked)
            .collect();
        Ok(ApiReply {
            value: issues,
            rate_limit_remaining: remaining,
        })
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<ApiReply<TrackedIssue>> {
        let (resp, remaining) = self
            .execute(self.http.post(self.url("issues")).json(issue))
            .await?;
        let wire: WireIssue = resp.json().await.context("decode created issue")?;
        Ok(ApiReply {
            value: wire.into_tracked(),
            rate_limit_remaining: remaining,
        })
    }

    async fn add_labels(&self, issue_id: u64, labels: &[String]) -> Result<ApiReply<()>> {
        let url = self.url(&format!("issues/{issue_id}/labels"));
        let body = serde_json::json!({ "labels": labels });
        let (_, remaining) = self.execute(self.http.post(&url).json(&body)).await?;
        Ok(ApiReply {
            value: (),
            rate_limit_remaining: remaining,
        })
    }

    async fn remove_label(&self, issue_id: u64, label: &str) -> Result<ApiReply<()>> {
        let url = self.url(&format!(
            "issues/{issue_id}/labels/{}",
            urlencoding::encode(label)
        ));
        let resp = self.decorate(self.http.delete(&url)).send().await?;
        let remaining = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        // 404 here means the label was already gone; not worth failing over.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            resp.error_for_status()?;
        }
        Ok(ApiReply {
            value: (),
            rate_limit_remaining: remaining,
        })
    }

    async fn add_comment(&self, issue_id: u64, body: &str) -> Result<ApiReply<()>> {
        let url = self.url(&format!("issues/{issue_id}/comments"));
        let payload = serde_json::json!({ "body": body });
        let (_, remaining) = self.execute(self.http.post(&url).json(&payload)).await?;
        Ok(ApiReply {
            value: (),
            rate_limit_remaining: remaining,
        })
    }

    async fn close_issue(&self, issue_id: u64) -> Result<ApiReply<()>> {
        let url = self.url(&format!("issues/{issue_id}"));
        let payload = serde_json::json!({ "state": "closed" });
        let (_, remaining) = self.execute(self.http.patch(&url).json(&payload)).await?;
        Ok(ApiReply {
            value: (),
            rate_limit_remaining: remaining,
        })
    }

    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<ApiReply<PullRequest>> {
        let (resp, remaining) = self
            .execute(self.http.post(self.url("pulls")).json(pr))
            .await?;
        let wire: WirePull = resp.json().await.context("decode created pull request")?;
        Ok(ApiReply {
            value: PullRequest {
                number: wire.number,
                html_url: wire.html_url,
            },
            rate_limit_remaining: remaining,
        })
    }
}
