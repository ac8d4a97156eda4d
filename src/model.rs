//! Core domain entities (`spec.md` §3), independent of GitHub's wire
//! format. The Planner builds these from `github::models` responses; the
//! Correlator and Span Emitter only ever see these.

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    TimedOut,
    ActionRequired,
    StartupFailure,
}

impl Conclusion {
    pub fn is_success(&self) -> bool {
        matches!(self, Conclusion::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Pending,
    Requested,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: u64,
    pub name: String,
    pub head_sha: String,
    pub event: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub started_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub html_url: String,
}

impl WorkflowRun {
    pub fn effective_completed_at(&self) -> OffsetDateTime {
        self.completed_at.unwrap_or(self.started_at)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: u64,
    pub run_id: u64,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub started_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub runner_label: Option<String>,
    pub is_required: bool,
    pub steps: Vec<Step>,
    pub html_url: String,
}

impl Job {
    /// Clamps to `started_at` when the job has not yet completed, so
    /// interval-based computations always see a well-formed span.
    pub fn effective_completed_at(&self) -> OffsetDateTime {
        self.completed_at.unwrap_or(self.started_at)
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    pub job_id: u64,
    pub ordinal: u32,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewKind {
    Approved,
    ChangesRequested,
    Commented,
    Merged,
}

impl ReviewKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewKind::Approved => "approved",
            ReviewKind::ChangesRequested => "changes_requested",
            ReviewKind::Commented => "commented",
            ReviewKind::Merged => "merged",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewEvent {
    pub kind: ReviewKind,
    pub actor: String,
    pub at: OffsetDateTime,
    pub target_url: String,
}
