//! API Client (`spec.md` §4.1): a single bearer-authenticated wrapper over
//! the GitHub REST surface with retry/backoff, rate-limit observance, and a
//! semaphore bounding global in-flight requests.
//!
//! Grounded on the teacher's `setup_api_client`/`retrieve_workflow_runs` in
//! `github.rs` for the request shape, and on `zizmor`'s `GitHubHost`/
//! `ClientError` for the retry and error-taxonomy structure.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode, header};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::models::{PullRequest, RepoCommit, Review, WorkflowJob, WorkflowRun};
use crate::error::ApiProblem;
use crate::reference::Commit;

const API_BASE: &str = "https://api.github.com";

/// Construction parameters for [`Client`], lifted from `spec.md` §6's
/// Config record fields that govern the transport itself.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub max_in_flight: usize,
    pub http_timeout: Duration,
    pub retry_max: u32,
    pub rate_limit_buffer: u32,
}

/// Process-wide rate-limit bookkeeping, updated from every response's
/// `X-RateLimit-*` headers. Shared across every clone of [`Client`].
#[derive(Debug, Default)]
struct RateLimitState {
    remaining: u32,
    reset_at: Option<time::OffsetDateTime>,
}

/// Bearer-authenticated REST client. Cheap to clone — internals are `Arc`'d.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    token: String,
    semaphore: Arc<Semaphore>,
    rate_limit: Arc<tokio::sync::Mutex<RateLimitState>>,
    retry_max: u32,
    rate_limit_buffer: u32,
    cancellation: CancellationToken,
}

impl Client {
    pub fn new(config: ClientConfig, cancellation: CancellationToken) -> Result<Self, ApiProblem> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent("gha-causal-trace")
            .build()
            .map_err(ApiProblem::from)?;

        Ok(Self {
            http,
            token: config.token,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            rate_limit: Arc::new(tokio::sync::Mutex::new(RateLimitState::default())),
            retry_max: config.retry_max,
            rate_limit_buffer: config.rate_limit_buffer,
            cancellation,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<PullRequest>, ApiProblem> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/pulls/{number}");
        self.get_optional(&url).await
    }

    #[instrument(skip(self))]
    pub async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<Commit>, ApiProblem> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/commits/{sha}");
        let found: Option<RepoCommit> = self.get_optional(&url).await?;
        Ok(found.map(|commit| Commit {
            sha: commit.sha,
            branch: None,
            pushed_at: Some(commit.commit.committer.date),
        }))
    }

    pub fn list_pull_request_commits(&self, owner: &str, repo: &str, number: u64) -> Paginated<RepoCommit> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/pulls/{number}/commits");
        Paginated::new(self.clone(), url)
    }

    pub fn list_workflow_runs_for_commit(&self, owner: &str, repo: &str, sha: &str) -> Paginated<WorkflowRun> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/actions/runs?head_sha={sha}");
        Paginated::new(self.clone(), url)
    }

    pub fn list_jobs_for_run(&self, owner: &str, repo: &str, run_id: u64) -> Paginated<WorkflowJob> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/actions/runs/{run_id}/jobs");
        Paginated::new(self.clone(), url)
    }

    pub fn list_reviews(&self, owner: &str, repo: &str, number: u64) -> Paginated<Review> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/pulls/{number}/reviews");
        Paginated::new(self.clone(), url)
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ApiProblem> {
        match self.request_with_retry(url).await {
            Ok(response) => {
                let body = response.bytes().await.map_err(ApiProblem::from)?;
                serde_json::from_slice(&body).map(Some).map_err(ApiProblem::from)
            }
            Err(ApiProblem::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Performs one logical request, retrying transient failures with
    /// exponential backoff and full jitter, honoring `Retry-After` and the
    /// client's low-water-mark rate-limit wait. Per `spec.md` §4.1, 4xx
    /// other than 429 are never retried.
    async fn request_with_retry(&self, url: &str) -> Result<reqwest::Response, ApiProblem> {
        self.wait_for_rate_limit_headroom().await;

        let mut attempt: u32 = 0;
        loop {
            if self.cancellation.is_cancelled() {
                return Err(ApiProblem::Cancelled);
            }

            let _permit = tokio::select! {
                permit = self.semaphore.acquire() => permit.expect("semaphore not closed"),
                _ = self.cancellation.cancelled() => return Err(ApiProblem::Cancelled),
            };

            let request = self
                .http
                .request(Method::GET, url)
                .bearer_auth(&self.token)
                .header(header::ACCEPT, "application/vnd.github+json");

            let outcome = request.send().await;
            drop(_permit);

            match outcome {
                Ok(response) => {
                    self.record_rate_limit(response.headers()).await;

                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(ApiProblem::NotFound);
                    }

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        if status == StatusCode::FORBIDDEN && is_rate_limited(&response) {
                            let retry_after = retry_after_secs(&response);
                            if attempt >= self.retry_max {
                                return Err(ApiProblem::RateLimited { retry_after_secs: retry_after });
                            }
                            warn!(retry_after, "secondary rate limit, backing off");
                            sleep(Duration::from_secs(retry_after)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ApiProblem::Unauthorized);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = retry_after_secs(&response);
                        if attempt >= self.retry_max {
                            return Err(ApiProblem::RateLimited { retry_after_secs: retry_after });
                        }
                        sleep(Duration::from_secs(retry_after)).await;
                        attempt += 1;
                        continue;
                    }

                    if status.is_server_error() {
                        if attempt >= self.retry_max {
                            return Err(ApiProblem::Upstream5xx { status: status.as_u16() });
                        }
                        sleep(backoff_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(ApiProblem::Upstream5xx { status: status.as_u16() });
                }
                Err(error) => {
                    let problem = ApiProblem::from(error);
                    if !problem.is_transient() || attempt >= self.retry_max {
                        return Err(problem);
                    }
                    debug!(attempt, "transient failure, retrying");
                    sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn wait_for_rate_limit_headroom(&self) {
        let (remaining, reset_at) = {
            let state = self.rate_limit.lock().await;
            (state.remaining, state.reset_at)
        };

        if remaining > self.rate_limit_buffer {
            return;
        }

        if let Some(reset_at) = reset_at {
            let now = time::OffsetDateTime::now_utc();
            if reset_at > now {
                let wait = reset_at - now;
                let wait = Duration::from_secs(wait.whole_seconds().max(0) as u64);
                warn!(?wait, "rate limit low-water mark reached, waiting for reset");
                sleep(wait).await;
            }
        }
    }

    async fn record_rate_limit(&self, headers: &header::HeaderMap) {
        let remaining = headers
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u32>().ok());
        let reset = headers
            .get("x-ratelimit-reset")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(|epoch| time::OffsetDateTime::from_unix_timestamp(epoch).ok());

        if let Some(remaining) = remaining {
            let mut state = self.rate_limit.lock().await;
            state.remaining = remaining;
            if let Some(reset) = reset {
                state.reset_at = Some(reset);
            }
        }
    }
}

fn is_rate_limited(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .map(|value| value == "0")
        .unwrap_or(false)
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(60)
}

/// Exponential backoff with full jitter: `random(0, base * 2^attempt)`,
/// capped at 30s, per `spec.md` §4.1.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 200u64;
    let cap_ms = 30_000u64;
    let max = (base_ms.saturating_mul(1u64 << attempt.min(10))).min(cap_ms);
    let jittered = rand::rng().random_range(0..=max);
    Duration::from_millis(jittered)
}

fn next_link(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    for part in link.split(',') {
        let mut segments = part.split(';');
        let url_part = segments.next()?.trim();
        let is_next = segments.any(|segment| segment.trim() == "rel=\"next\"");
        if is_next {
            return Some(url_part.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}

/// Lazy follow-the-`Link`-header page sequence. Not restartable, per
/// `spec.md` §4.1 — once a page is consumed it's gone.
pub struct Paginated<T> {
    client: Client,
    next_url: Option<String>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Paginated<T> {
    fn new(client: Client, url: String) -> Self {
        Self { client, next_url: Some(url), _marker: std::marker::PhantomData }
    }

    /// Fetches one page, returning its items and advancing internal state to
    /// the next page's URL (or `None` when exhausted).
    pub async fn next_page(&mut self) -> Result<Vec<T>, ApiProblem> {
        let Some(url) = self.next_url.take() else {
            return Ok(Vec::new());
        };

        let response = self.client.request_with_retry(&url).await?;
        self.next_url = next_link(response.headers());
        let body = response.bytes().await.map_err(ApiProblem::from)?;
        serde_json::from_slice(&body).map_err(ApiProblem::from)
    }

    /// Drains every page. Used by callers (e.g. the Resolver) that need the
    /// whole listing rather than a truly lazy cursor.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ApiProblem> {
        let mut items = Vec::new();
        while self.next_url.is_some() {
            let page = self.next_page().await?;
            items.extend(page);
        }
        Ok(items)
    }
}
