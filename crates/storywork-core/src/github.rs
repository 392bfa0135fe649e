use crate::engine::{Attempt, Backoff};
use crate::error::{Result, StoryworkError};
use llm_client::client::parse_retry_after;
use llm_client::error::{is_retryable_status, truncate_body};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const GITHUB_API: &str = "https://api.github.com";
pub const GITHUB_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Issue model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Present only on pull requests, which share the issues endpoint.
    #[serde(default)]
    pub pull_request: Option<Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }
}

// ---------------------------------------------------------------------------
// Source / sink seams
// ---------------------------------------------------------------------------

/// Read side of the issue tracker.
pub trait IssueSource: Send + Sync + 'static {
    /// One raw page of open issues, pull requests included.
    fn list_open_page(
        &self,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Vec<Issue>>> + Send;

    fn fetch_issue(&self, repo: &str, number: u64) -> impl Future<Output = Result<Issue>> + Send;
}

/// Write side of the issue tracker.
pub trait IssueSink: Send + Sync + 'static {
    fn update_body(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn labels(&self, repo: &str, number: u64) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn add_label(
        &self,
        repo: &str,
        number: u64,
        label: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Removing a label the issue does not carry succeeds.
    fn remove_label(
        &self,
        repo: &str,
        number: u64,
        label: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// All open issues of `repo`, pull requests filtered out.
///
/// Paging stops on the raw page length: a page full of pull requests still
/// means there may be more.
pub async fn collect_open_issues<S: IssueSource>(
    source: &S,
    repo: &str,
    per_page: u32,
) -> Result<Vec<Issue>> {
    let per_page = per_page.clamp(1, 100);
    let mut issues = Vec::new();
    let mut page = 1;
    loop {
        let raw = source.list_open_page(repo, page, per_page).await?;
        let raw_len = raw.len();
        issues.extend(raw.into_iter().filter(|i| !i.is_pull_request()));
        debug!(repo, page, raw_len, "fetched issues page");
        if raw_len < per_page as usize {
            break;
        }
        page += 1;
    }
    Ok(issues)
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    owner: String,
    base_url: String,
    backoff: Backoff,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, owner: impl Into<String>, backoff: Backoff) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(StoryworkError::Config("GITHUB_TOKEN is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(GITHUB_TIMEOUT)
            .user_agent(concat!("storywork/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoryworkError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            token,
            owner: owner.into(),
            base_url: GITHUB_API.to_string(),
            backoff,
        })
    }

    /// Token from `GITHUB_TOKEN`; missing is a configuration error.
    pub fn from_env(owner: impl Into<String>, backoff: Backoff) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| StoryworkError::Config("GITHUB_TOKEN is not set".into()))?;
        Self::new(token, owner, backoff)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn endpoint(&self, repo: &str, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoryworkError::Config(format!("invalid GitHub base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoryworkError::Config("GitHub base URL cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), repo])
            .extend(tail);
        Ok(url)
    }

    /// Send with retries. `Ok(None)` only when `allow_404` and the server said 404.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        allow_404: bool,
    ) -> Result<Option<String>> {
        self.backoff
            .execute(|| self.attempt(method.clone(), &url, body.as_ref(), allow_404))
            .await
            .map_err(StoryworkError::Remote)
    }

    async fn attempt(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        allow_404: bool,
    ) -> Attempt<Option<String>> {
        let mut req = self
            .http
            .request(method, url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return Attempt::retryable(format!("request to {url} failed: {e}")),
        };
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return Attempt::retryable(format!("reading response from {url}: {e}")),
        };

        if (200..300).contains(&status) {
            return Attempt::Success(Some(text));
        }
        if status == 404 && allow_404 {
            return Attempt::Success(None);
        }
        let detail = format!("HTTP {status} from {url}: {}", truncate_body(&text));
        if is_secondary_rate_limit(status, &headers) {
            Attempt::Retryable {
                detail,
                retry_after: parse_retry_after(&headers).or_else(|| rate_limit_reset(&headers)),
            }
        } else if is_retryable_status(status) {
            Attempt::Retryable {
                detail,
                retry_after: parse_retry_after(&headers),
            }
        } else {
            Attempt::Fatal(detail)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let text = self.send(Method::GET, url.clone(), None, false).await?;
        parse_json(&url, text.as_deref().unwrap_or_default())
    }
}

fn parse_json<T: DeserializeOwned>(url: &Url, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| StoryworkError::UnexpectedResponse {
        url: url.to_string(),
        detail: format!("{e}: {}", truncate_body(text)),
    })
}

fn is_secondary_rate_limit(status: u16, headers: &HeaderMap) -> bool {
    status == 403
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0")
}

/// Delay until the epoch in `X-RateLimit-Reset`, if it lies in the future.
fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
    let reset: u64 = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    reset.checked_sub(now).map(Duration::from_secs)
}

impl IssueSource for GitHubClient {
    async fn list_open_page(&self, repo: &str, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let mut url = self.endpoint(repo, &["issues"])?;
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        self.get_json(url).await
    }

    async fn fetch_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        let url = self.endpoint(repo, &["issues", &number.to_string()])?;
        self.get_json(url).await
    }
}

impl IssueSink for GitHubClient {
    async fn update_body(&self, repo: &str, number: u64, body: &str) -> Result<()> {
        let url = self.endpoint(repo, &["issues", &number.to_string()])?;
        self.send(Method::PATCH, url, Some(json!({ "body": body })), false)
            .await?;
        Ok(())
    }

    async fn labels(&self, repo: &str, number: u64) -> Result<Vec<String>> {
        let mut url = self.endpoint(repo, &["issues", &number.to_string(), "labels"])?;
        url.query_pairs_mut().append_pair("per_page", "100");
        let labels: Vec<Label> = self.get_json(url).await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn add_label(&self, repo: &str, number: u64, label: &str) -> Result<()> {
        let url = self.endpoint(repo, &["issues", &number.to_string(), "labels"])?;
        self.send(Method::POST, url, Some(json!({ "labels": [label] })), false)
            .await?;
        Ok(())
    }

    async fn remove_label(&self, repo: &str, number: u64, label: &str) -> Result<()> {
        let url = self.endpoint(repo, &["issues", &number.to_string(), "labels", label])?;
        if self.send(Method::DELETE, url, None, true).await?.is_none() {
            debug!(repo, number, label, "label was not present");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
