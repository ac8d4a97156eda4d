//! Fetch Planner (`spec.md` §4.3): drives ingestion for a list of
//! References with a bounded fan-out, in the spirit of the pack's
//! Semaphore/JoinSet worker pool (`decomp.dev`'s `github::list_workflow_runs`)
//! and its `CancellationToken`-threaded orchestration loop (`gator`'s
//! orchestrator).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::correlator::{self, Correlation};
use crate::error::IngestError;
use crate::github::client::Client;
use crate::github::models as wire;
use crate::model::{Conclusion, Job, ReviewEvent, ReviewKind, RunStatus, Step, WorkflowRun};
use crate::progress::ProgressReporter;
use crate::reference::{self, Reference};
use crate::span::{self, Span};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub concurrency_per_ref: usize,
    pub window: Option<Duration>,
    /// Shift every emitted timestamp so the latest activity lands just
    /// before "now", for manual testing against a live OTel backend. Mirrors
    /// the teacher's per-run `delta` in `github.rs`'s `retrieve_workflow_runs`.
    pub devel: bool,
}

/// One Reference's outcome: either its emitted spans and metrics, or the
/// Resolution failure that caused it to be skipped.
pub struct ReferenceOutcome {
    pub reference: Reference,
    pub spans: Vec<Span>,
    pub correlation: Option<Correlation>,
    pub error: Option<IngestError>,
}

/// Runs the full Planner over every Reference, preserving input order in
/// the returned vector regardless of completion order, per `spec.md` §4.3.
pub async fn run(
    client: Arc<Client>,
    references: Vec<Reference>,
    config: PlannerConfig,
    progress: Arc<dyn ProgressReporter>,
    cancellation: CancellationToken,
) -> Vec<ReferenceOutcome> {
    let total = references.len();
    let mut join_set: JoinSet<(usize, ReferenceOutcome)> = JoinSet::new();

    for (index, reference) in references.into_iter().enumerate() {
        let client = Arc::clone(&client);
        let progress = Arc::clone(&progress);
        let cancellation = cancellation.clone();
        let config = config.clone();

        join_set.spawn(async move {
            let outcome = process_reference(&client, &reference, &config, progress.as_ref(), index, total, &cancellation).await;
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<ReferenceOutcome>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(join_error) => warn!(%join_error, "reference worker panicked"),
        }
    }

    let mut outcomes: Vec<ReferenceOutcome> = outcomes.into_iter().flatten().collect();

    if let Some(window) = config.window {
        if let Some(cutoff) = latest_activity(&outcomes).map(|latest| latest - window) {
            for outcome in &mut outcomes {
                apply_window(outcome, cutoff);
            }
        }
    }

    if config.devel {
        let now = time::OffsetDateTime::now_utc();
        for outcome in &mut outcomes {
            apply_devel_shift(outcome, now);
        }
    }

    outcomes
}

/// Shifts every span's timestamps by the same delta so the Reference's
/// latest activity lands ten minutes before `now`, the way the teacher's
/// `--devel` flag brought old fixture runs near "now" for manual testing
/// against a live OTel backend.
fn apply_devel_shift(outcome: &mut ReferenceOutcome, now: time::OffsetDateTime) {
    let Some(latest) = outcome.spans.iter().map(|span| span.end_at).max() else {
        return;
    };
    let delta = now - latest - time::Duration::minutes(10);
    for span in &mut outcome.spans {
        span.start_at = span.start_at + delta;
        span.end_at = span.end_at + delta;
    }
}

/// `latestActivity` per `spec.md` §4.3: the maximum of every merge marker's
/// timestamp and every Run/Job's `completedAt`, across all References.
fn latest_activity(outcomes: &[ReferenceOutcome]) -> Option<time::OffsetDateTime> {
    outcomes
        .iter()
        .filter_map(|outcome| outcome.correlation.as_ref())
        .flat_map(|correlation| {
            let run_ends = correlation.runs.iter().map(|run| run.run.effective_completed_at());
            let job_ends = correlation.runs.iter().flat_map(|run| run.jobs.iter().map(|job| job.effective_completed_at()));
            let merge_ats = correlation
                .markers
                .iter()
                .filter(|marker| marker.kind == crate::model::ReviewKind::Merged)
                .map(|marker| marker.at);
            run_ends.chain(job_ends).chain(merge_ats)
        })
        .max()
}

/// Discards spans ending before `cutoff`; clamps the start of spans that
/// cross it, per `spec.md` §4.3's window filter.
fn apply_window(outcome: &mut ReferenceOutcome, cutoff: time::OffsetDateTime) {
    outcome.spans.retain_mut(|span| {
        if span.is_marker() {
            return span.start_at >= cutoff;
        }
        if span.end_at < cutoff {
            return false;
        }
        if span.start_at < cutoff {
            span.start_at = cutoff;
        }
        true
    });
}

async fn process_reference(
    client: &Client,
    reference: &Reference,
    config: &PlannerConfig,
    progress: &dyn ProgressReporter,
    index: usize,
    total: usize,
    cancellation: &CancellationToken,
) -> ReferenceOutcome {
    progress.start_url(index, total, &reference.display_url);
    progress.set_phase("resolving");
    progress.set_detail(&format!("resolving commits for {}", reference.display_name));

    let commits = match reference::resolve_commits(client, reference).await {
        Ok(commits) => commits,
        Err(error) => {
            progress.finish();
            return ReferenceOutcome { reference: reference.clone(), spans: Vec::new(), correlation: None, error: Some(error) };
        }
    };

    if cancellation.is_cancelled() {
        progress.finish();
        return ReferenceOutcome {
            reference: reference.clone(),
            spans: Vec::new(),
            correlation: None,
            error: Some(IngestError::Fatal("cancelled".to_string())),
        };
    }

    progress.set_phase("listing runs");
    let mut runs: Vec<WorkflowRun> = Vec::new();
    for commit in &commits {
        progress.set_detail(&format!("listing workflow runs for commit {}", commit.sha));
        match client.list_workflow_runs_for_commit(&reference.owner, &reference.repo, &commit.sha).collect_all().await {
            Ok(wire_runs) => runs.extend(wire_runs.into_iter().map(from_wire_run)),
            Err(source) => {
                progress.finish();
                return ReferenceOutcome {
                    reference: reference.clone(),
                    spans: Vec::new(),
                    correlation: None,
                    error: Some(IngestError::Resolution { display_url: reference.display_url.clone(), source }),
                };
            }
        }
    }

    progress.set_url_runs(runs.len());
    progress.set_phase("fetching jobs");
    progress.set_detail(&format!("fetching jobs for {} runs", runs.len()));

    let semaphore = Arc::new(Semaphore::new(config.concurrency_per_ref.max(1)));
    let mut job_fetches: JoinSet<Result<Vec<Job>, IngestError>> = JoinSet::new();
    for run in &runs {
        let owner = reference.owner.clone();
        let repo = reference.repo.clone();
        let run_id = run.run_id;
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let cancellation = cancellation.clone();
        let display_url = reference.display_url.clone();

        job_fetches.spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire() => permit.expect("semaphore not closed"),
                _ = cancellation.cancelled() => return Err(IngestError::Fatal("cancelled".to_string())),
            };
            client
                .list_jobs_for_run(&owner, &repo, run_id)
                .collect_all()
                .await
                .map(|wire_jobs| wire_jobs.into_iter().map(from_wire_job).collect())
                .map_err(|source| IngestError::Resolution { display_url, source })
        });
    }

    let mut jobs: Vec<Job> = Vec::new();
    while let Some(joined) = job_fetches.join_next().await {
        match joined {
            Ok(Ok(fetched)) => jobs.extend(fetched),
            Ok(Err(error)) => {
                progress.finish();
                return ReferenceOutcome { reference: reference.clone(), spans: Vec::new(), correlation: None, error: Some(error) };
            }
            Err(join_error) => warn!(%join_error, "job fetch worker panicked"),
        }
        progress.process_run();
    }

    let markers = match &reference.kind {
        reference::ReferenceKind::PullRequest(number) => {
            progress.set_phase("fetching reviews");
            progress.set_detail(&format!("fetching reviews for pull request #{number}"));
            match fetch_markers(client, reference, *number).await {
                Ok(markers) => markers,
                Err(error) => {
                    progress.finish();
                    return ReferenceOutcome { reference: reference.clone(), spans: Vec::new(), correlation: None, error: Some(error) };
                }
            }
        }
        reference::ReferenceKind::Commit(_) => Vec::new(),
    };

    progress.set_phase("correlating");
    progress.set_detail(&format!("correlating {} runs and {} jobs", runs.len(), jobs.len()));
    let correlation = correlator::correlate(runs, jobs, markers);
    let spans = span::emit(reference, &correlation);

    progress.finish();
    ReferenceOutcome { reference: reference.clone(), spans, correlation: Some(correlation), error: None }
}

async fn fetch_markers(client: &Client, reference: &Reference, number: u64) -> Result<Vec<ReviewEvent>, IngestError> {
    let wire_reviews = client
        .list_reviews(&reference.owner, &reference.repo, number)
        .collect_all()
        .await
        .map_err(|source| IngestError::Resolution { display_url: reference.display_url.clone(), source })?;

    let mut markers: Vec<ReviewEvent> = wire_reviews.into_iter().filter_map(from_wire_review).collect();

    if let Some(pr) = client
        .get_pull_request(&reference.owner, &reference.repo, number)
        .await
        .map_err(|source| IngestError::Resolution { display_url: reference.display_url.clone(), source })?
    {
        if let Some(merged_at) = pr.merged_at.as_deref().and_then(|raw| time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()) {
            markers.push(ReviewEvent {
                kind: ReviewKind::Merged,
                actor: "".to_string(),
                at: merged_at,
                target_url: pr.html_url.clone(),
            });
        }
    }

    Ok(markers)
}

fn from_wire_status(status: wire::Status) -> RunStatus {
    match status {
        wire::Status::Queued => RunStatus::Queued,
        wire::Status::InProgress => RunStatus::InProgress,
        wire::Status::Completed => RunStatus::Completed,
        wire::Status::Waiting => RunStatus::Waiting,
        wire::Status::Pending => RunStatus::Pending,
        wire::Status::Requested => RunStatus::Requested,
    }
}

fn from_wire_conclusion(conclusion: wire::Conclusion) -> Conclusion {
    match conclusion {
        wire::Conclusion::ActionRequired => Conclusion::ActionRequired,
        wire::Conclusion::Cancelled => Conclusion::Cancelled,
        wire::Conclusion::Failure => Conclusion::Failure,
        wire::Conclusion::Neutral => Conclusion::Neutral,
        wire::Conclusion::Skipped => Conclusion::Skipped,
        wire::Conclusion::Success => Conclusion::Success,
        wire::Conclusion::TimedOut => Conclusion::TimedOut,
        wire::Conclusion::StartupFailure => Conclusion::StartupFailure,
    }
}

fn from_wire_run(run: wire::WorkflowRun) -> WorkflowRun {
    WorkflowRun {
        run_id: run.id,
        name: run.name.unwrap_or_else(|| "unnamed".to_string()),
        head_sha: run.head_sha,
        event: run.event,
        status: from_wire_status(run.status),
        conclusion: run.conclusion.map(from_wire_conclusion),
        started_at: run.created_at,
        completed_at: if matches!(run.status, wire::Status::Completed) { Some(run.updated_at) } else { None },
        html_url: run.html_url,
    }
}

fn from_wire_job(job: wire::WorkflowJob) -> Job {
    let started_at = job.started_at.unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
    let job_id = job.id;
    Job {
        job_id,
        run_id: job.run_id,
        name: job.name,
        status: from_wire_status(job.status),
        conclusion: job.conclusion.map(from_wire_conclusion),
        started_at,
        completed_at: job.completed_at,
        runner_label: job.runner_name,
        is_required: true,
        steps: job.steps.into_iter().map(|step| from_wire_step(step, job_id)).collect(),
        html_url: job.html_url,
    }
}

fn from_wire_step(step: wire::WorkflowStep, job_id: u64) -> Step {
    Step {
        job_id,
        ordinal: step.number,
        name: step.name,
        status: from_wire_status(step.status),
        conclusion: step.conclusion.map(from_wire_conclusion),
        started_at: step.started_at,
        completed_at: step.completed_at,
    }
}

fn from_wire_review(review: wire::Review) -> Option<ReviewEvent> {
    let kind = match review.state.as_str() {
        "APPROVED" => ReviewKind::Approved,
        "CHANGES_REQUESTED" => ReviewKind::ChangesRequested,
        "COMMENTED" => ReviewKind::Commented,
        _ => return None,
    };
    Some(ReviewEvent { kind, actor: review.user.login, at: review.submitted_at, target_url: review.html_url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Conclusion;
    use crate::reference::{Reference, ReferenceKind};
    use crate::span::emit;

    fn reference() -> Reference {
        Reference {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            kind: ReferenceKind::Commit("abc123".to_string()),
            display_url: "acme/widgets/commit/abc123".to_string(),
            display_name: "acme/widgets#abc123".to_string(),
            url_index: 0,
        }
    }

    fn outcome_with_spans(spans: Vec<crate::span::Span>) -> ReferenceOutcome {
        ReferenceOutcome {
            reference: reference(),
            spans,
            correlation: Some(Correlation { runs: Vec::new(), markers: Vec::new(), metrics: Default::default() }),
            error: None,
        }
    }

    fn run_with_jobs(run_id: u64, start_offset_s: i64, end_offset_s: i64) -> WorkflowRun {
        let base = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        WorkflowRun {
            run_id,
            name: "CI".to_string(),
            head_sha: "abc123".to_string(),
            event: "push".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: base + time::Duration::seconds(start_offset_s),
            completed_at: Some(base + time::Duration::seconds(end_offset_s)),
            html_url: String::new(),
        }
    }

    fn job_at(job_id: u64, run_id: u64, start_offset_s: i64, end_offset_s: i64) -> Job {
        let base = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        Job {
            job_id,
            run_id,
            name: format!("job-{job_id}"),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: base + time::Duration::seconds(start_offset_s),
            completed_at: Some(base + time::Duration::seconds(end_offset_s)),
            runner_label: None,
            is_required: true,
            steps: Vec::new(),
            html_url: String::new(),
        }
    }

    #[test]
    fn window_filter_drops_runs_entirely_before_the_cutoff_and_keeps_the_rest() {
        // Mirrors spec.md §8 scenario 5: runs at -48h, -2h, -10m with a 6h window.
        let base = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let far_past = run_with_jobs(1, -48 * 3600, -48 * 3600 + 60);
        let recent = run_with_jobs(2, -2 * 3600, -2 * 3600 + 60);
        let latest = run_with_jobs(3, -600, -600 + 60);

        let far_job = job_at(10, 1, -48 * 3600, -48 * 3600 + 60);
        let recent_job = job_at(20, 2, -2 * 3600, -2 * 3600 + 60);
        let latest_job = job_at(30, 3, -600, -600 + 60);

        let correlation = correlator::correlate(vec![far_past, recent, latest], vec![far_job, recent_job, latest_job], Vec::new());
        let reference = reference();
        let spans = emit(&reference, &correlation);

        let mut outcome = ReferenceOutcome { reference, spans, correlation: Some(correlation), error: None };
        let cutoff = base - time::Duration::seconds(600) - time::Duration::hours(6);
        apply_window(&mut outcome, cutoff);

        let remaining_names: Vec<&str> = outcome.spans.iter().map(|span| span.name.as_str()).collect();
        assert!(!remaining_names.iter().any(|name| name.contains("job-10")));
        assert!(remaining_names.iter().any(|name| name.contains("job-20")));
        assert!(remaining_names.iter().any(|name| name.contains("job-30")));
    }

    #[test]
    fn latest_activity_is_max_of_run_job_and_merge_timestamps() {
        let run = run_with_jobs(1, 0, 3600);
        let job = job_at(1, 1, 0, 1800);
        let correlation = correlator::correlate(vec![run], vec![job], Vec::new());
        let outcome = outcome_with_spans(Vec::new());
        let mut outcome = outcome;
        outcome.correlation = Some(correlation);

        let latest = latest_activity(std::slice::from_ref(&outcome));
        let expected = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap() + time::Duration::seconds(3600);
        assert_eq!(latest, Some(expected));
    }

    #[test]
    fn devel_shift_moves_latest_activity_to_ten_minutes_before_now() {
        let run = run_with_jobs(1, 0, 3600);
        let job = job_at(1, 1, 0, 3600);
        let correlation = correlator::correlate(vec![run], vec![job], Vec::new());
        let reference = reference();
        let spans = emit(&reference, &correlation);
        let mut outcome = ReferenceOutcome { reference, spans, correlation: Some(correlation), error: None };

        let now = time::OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap();
        apply_devel_shift(&mut outcome, now);

        let shifted_latest = outcome.spans.iter().map(|span| span.end_at).max().unwrap();
        assert_eq!(shifted_latest, now - time::Duration::minutes(10));
    }
}
