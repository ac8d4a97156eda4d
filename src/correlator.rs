//! Correlator (`spec.md` §4.4): joins workflow runs, jobs, steps, and review
//! events into one ordered hierarchy, and computes the derived metrics.
//!
//! Deterministic, pure, CPU-bound — no suspension points, matching §5.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;

use crate::model::{Job, ReviewEvent, WorkflowRun};

#[derive(Debug, Clone)]
pub struct CorrelatedRun {
    pub run: WorkflowRun,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_runs: usize,
    pub total_jobs: usize,
    pub total_steps: usize,
    pub success_rate: f64,
    pub job_success_rate: f64,
    pub pending_jobs: usize,
    pub wall_time: Duration,
    pub compute_time: Duration,
    pub queue_time: Duration,
    pub max_concurrency: usize,
    pub bottleneck_job_ids: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct Correlation {
    pub runs: Vec<CorrelatedRun>,
    pub markers: Vec<ReviewEvent>,
    pub metrics: Metrics,
}

/// Joins one Reference's fetch bag. `jobs` carries every Job fetched for
/// every Run in `runs`, already embedding its own Steps; `markers` is the
/// Reference's review events plus a synthetic merge event, or empty for a
/// commit Reference.
pub fn correlate(runs: Vec<WorkflowRun>, jobs: Vec<Job>, markers: Vec<ReviewEvent>) -> Correlation {
    let mut correlated_runs: Vec<CorrelatedRun> = runs
        .into_iter()
        .map(|run| CorrelatedRun { run, jobs: Vec::new() })
        .collect();

    for job in jobs {
        match correlated_runs.iter_mut().find(|candidate| candidate.run.run_id == job.run_id) {
            Some(owner) => owner.jobs.push(job),
            None => warn!(job_id = job.job_id, run_id = job.run_id, "dropping orphan job: no matching run"),
        }
    }

    correlated_runs.sort_by_key(|run| run.run.started_at);
    for run in &mut correlated_runs {
        run.jobs.sort_by_key(|job| job.started_at);
        for job in &mut run.jobs {
            job.steps.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.started_at.cmp(&b.started_at)));
        }
    }

    let metrics = compute_metrics(&correlated_runs);

    Correlation { runs: correlated_runs, markers, metrics }
}

fn compute_metrics(runs: &[CorrelatedRun]) -> Metrics {
    let total_runs = runs.len();
    let all_jobs: Vec<&Job> = runs.iter().flat_map(|run| run.jobs.iter()).collect();
    let total_jobs = all_jobs.len();
    let total_steps: usize = all_jobs.iter().map(|job| job.steps.len()).sum();

    let successful_runs = runs.iter().filter(|run| run.run.conclusion.map(|c| c.is_success()).unwrap_or(false)).count();
    let success_rate = if total_runs == 0 { 0.0 } else { successful_runs as f64 / total_runs as f64 };

    let successful_jobs = all_jobs.iter().filter(|job| job.conclusion.map(|c| c.is_success()).unwrap_or(false)).count();
    let job_success_rate = if total_jobs == 0 { 0.0 } else { successful_jobs as f64 / total_jobs as f64 };

    let pending_jobs = all_jobs.iter().filter(|job| !job.status.is_terminal()).count();

    let wall_time = compute_wall_time(&all_jobs);
    let compute_time = all_jobs
        .iter()
        .map(|job| job.effective_completed_at() - job.started_at)
        .fold(Duration::ZERO, |acc, d| acc + d.max(time::Duration::ZERO).unsigned_abs());

    let queue_time = runs
        .iter()
        .flat_map(|run| run.jobs.iter().map(move |job| (run.run.started_at, job)))
        .map(|(run_started_at, job)| job.started_at - run_started_at)
        .fold(Duration::ZERO, |acc, d| acc + d.max(time::Duration::ZERO).unsigned_abs());

    let max_concurrency = max_overlap(&all_jobs);
    let bottleneck_job_ids = detect_bottlenecks(&all_jobs);

    Metrics {
        total_runs,
        total_jobs,
        total_steps,
        success_rate,
        job_success_rate,
        pending_jobs,
        wall_time,
        compute_time,
        queue_time,
        max_concurrency,
        bottleneck_job_ids,
    }
}

fn compute_wall_time(jobs: &[&Job]) -> Duration {
    let Some(min_start) = jobs.iter().map(|job| job.started_at).min() else {
        return Duration::ZERO;
    };
    let max_end = jobs.iter().map(|job| job.effective_completed_at()).max().unwrap_or(min_start);
    (max_end - min_start).max(time::Duration::ZERO).unsigned_abs()
}

/// Peak of overlapping `[started_at, completed_at)` intervals, via the
/// standard sweep over interval endpoints. End events are ordered before
/// start events at an identical instant so a half-open boundary touch does
/// not count as overlap, per `spec.md` §4.4.
fn max_overlap(jobs: &[&Job]) -> usize {
    #[derive(PartialEq, Eq, PartialOrd, Ord)]
    enum EventKind {
        End,
        Start,
    }

    let mut events: Vec<(OffsetDateTime, EventKind)> = Vec::with_capacity(jobs.len() * 2);
    for job in jobs {
        events.push((job.started_at, EventKind::Start));
        events.push((job.effective_completed_at(), EventKind::End));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut current = 0usize;
    let mut peak = 0usize;
    for (_, kind) in events {
        match kind {
            EventKind::Start => {
                current += 1;
                peak = peak.max(current);
            }
            EventKind::End => current = current.saturating_sub(1),
        }
    }
    peak
}

/// Longest chain of non-overlapping job intervals maximizing total
/// duration — the critical path, found via weighted interval scheduling.
/// Returns (job ids on the path, total duration).
fn critical_path(jobs: &[&Job]) -> (Vec<u64>, Duration) {
    if jobs.is_empty() {
        return (Vec::new(), Duration::ZERO);
    }

    let mut ordered: Vec<&Job> = jobs.to_vec();
    ordered.sort_by_key(|job| job.effective_completed_at());

    let mut best_total: Vec<Duration> = Vec::with_capacity(ordered.len());
    let mut best_prev: Vec<Option<usize>> = Vec::with_capacity(ordered.len());

    for (i, job) in ordered.iter().enumerate() {
        let own = (job.effective_completed_at() - job.started_at).max(time::Duration::ZERO).unsigned_abs();
        let mut best_j: Option<usize> = None;
        let mut best_j_total = Duration::ZERO;
        for j in 0..i {
            if ordered[j].effective_completed_at() <= job.started_at && best_total[j] > best_j_total {
                best_j_total = best_total[j];
                best_j = Some(j);
            }
        }
        best_total.push(own + best_j_total);
        best_prev.push(best_j);
    }

    let (best_index, _) = best_total
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.cmp(b))
        .expect("non-empty jobs produce at least one candidate");

    let mut path = Vec::new();
    let mut cursor = Some(best_index);
    while let Some(index) = cursor {
        path.push(ordered[index].job_id);
        cursor = best_prev[index];
    }
    path.reverse();

    (path, best_total[best_index])
}

/// A job is a bottleneck when its duration is at least the larger of the
/// p90 job duration and the critical path's average per-job duration — see
/// the Open Question decision recorded in SPEC_FULL.md §12.
fn detect_bottlenecks(jobs: &[&Job]) -> Vec<u64> {
    if jobs.is_empty() {
        return Vec::new();
    }

    let mut durations: Vec<Duration> = jobs
        .iter()
        .map(|job| (job.effective_completed_at() - job.started_at).max(time::Duration::ZERO).unsigned_abs())
        .collect();
    durations.sort();

    let p90_index = ((durations.len() as f64) * 0.9).ceil() as usize;
    let p90_index = p90_index.saturating_sub(1).min(durations.len() - 1);
    let p90_duration = durations[p90_index];

    let (path, path_total) = critical_path(jobs);
    let critical_average = if path.is_empty() { Duration::ZERO } else { path_total / path.len() as u32 };

    let threshold = p90_duration.max(critical_average);

    jobs.iter()
        .filter(|job| {
            let duration = (job.effective_completed_at() - job.started_at).max(time::Duration::ZERO).unsigned_abs();
            duration >= threshold
        })
        .map(|job| job.job_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Conclusion, RunStatus};

    fn job(job_id: u64, run_id: u64, start_offset_s: i64, end_offset_s: i64) -> Job {
        let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
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
    fn max_overlap_counts_peak_concurrent_intervals() {
        let a = job(1, 100, 0, 60);
        let b = job(2, 100, 10, 40);
        let jobs: Vec<&Job> = vec![&a, &b];
        assert_eq!(max_overlap(&jobs), 2);
    }

    #[test]
    fn adjacent_intervals_do_not_overlap() {
        let a = job(1, 100, 0, 10);
        let b = job(2, 100, 10, 20);
        let jobs: Vec<&Job> = vec![&a, &b];
        assert_eq!(max_overlap(&jobs), 1);
    }

    #[test]
    fn orphan_jobs_are_dropped_with_a_warning() {
        let run = WorkflowRun {
            run_id: 1,
            name: "CI".to_string(),
            head_sha: "abc".to_string(),
            event: "push".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            completed_at: Some(OffsetDateTime::from_unix_timestamp(1_700_000_060).unwrap()),
            html_url: String::new(),
        };
        let orphan = job(99, 999, 0, 10);
        let correlation = correlate(vec![run], vec![orphan], Vec::new());
        assert_eq!(correlation.runs.len(), 1);
        assert!(correlation.runs[0].jobs.is_empty());
    }

    #[test]
    fn single_workflow_two_jobs_matches_spec_scenario_one() {
        let run = WorkflowRun {
            run_id: 100,
            name: "CI".to_string(),
            head_sha: "abc123".to_string(),
            event: "push".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            completed_at: Some(OffsetDateTime::from_unix_timestamp(1_700_000_060).unwrap()),
            html_url: String::new(),
        };
        let job_a = job(1, 100, 0, 60);
        let job_b = job(2, 100, 10, 40);
        let correlation = correlate(vec![run], vec![job_a, job_b], Vec::new());

        assert_eq!(correlation.metrics.max_concurrency, 2);
        assert_eq!(correlation.metrics.compute_time, Duration::from_secs(90));
        assert_eq!(correlation.metrics.wall_time, Duration::from_secs(60));
    }
}
