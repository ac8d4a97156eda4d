//! Wire types for the slice of the GitHub REST API this tool reads.
//!
//! Field selection and naming follow the teacher's `github.rs` structs
//! (`WorkflowRun`/`WorkflowJob`/`WorkflowStep`), broadened with the fields
//! `octocrab`'s `models::workflows` carries that the teacher's prototype
//! didn't need: `run_attempt`, `head_sha`, runner identity on jobs.

use serde::Deserialize;
use time::OffsetDateTime;
use time::serde::rfc3339;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Skipped,
    Success,
    TimedOut,
    StartupFailure,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Pending,
    Requested,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(rename = "head")]
    pub head_ref_info: RefInfo,
    #[serde(rename = "base")]
    pub base_ref_info: RefInfo,
    pub merged_at: Option<String>,
}

impl PullRequest {
    pub fn head_sha(&self) -> &str {
        &self.head_ref_info.sha
    }

    pub fn head_ref(&self) -> &str {
        &self.head_ref_info.r#ref
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefInfo {
    pub r#ref: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitActor {
    pub name: String,
    #[serde(with = "rfc3339")]
    pub date: OffsetDateTime,
}

/// The nested `commit` object on a `RepoCommit`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitInner {
    pub author: GitActor,
    pub committer: GitActor,
    pub message: String,
}

/// A single `GET /repos/{owner}/{repo}/commits/{sha}` response, and the
/// element type of `GET /repos/{owner}/{repo}/pulls/{number}/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoCommit {
    pub sha: String,
    pub commit: CommitInner,
    pub html_url: String,
}

/// A single `GET /repos/{owner}/{repo}/actions/runs` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub head_branch: String,
    pub head_sha: String,
    pub run_attempt: Option<u32>,
    pub event: String,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub updated_at: OffsetDateTime,
    pub html_url: String,
}

/// A single `GET /repos/{owner}/{repo}/actions/runs/{id}/jobs` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub run_id: u64,
    pub name: String,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    #[serde(with = "rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub html_url: String,
    pub runner_id: Option<u64>,
    pub runner_name: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// One entry in `WorkflowJob::steps`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    pub number: u32,
    #[serde(with = "rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// A single `GET /repos/{owner}/{repo}/pulls/{number}/reviews` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub id: u64,
    pub user: ReviewUser,
    pub state: String,
    #[serde(with = "rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewUser {
    pub login: String,
}
