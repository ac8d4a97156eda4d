//! Span Emitter (`spec.md` §4.5): projects the correlated hierarchy onto
//! OpenTelemetry-shaped spans with deterministic IDs.
//!
//! Deterministic hashing is the teacher's `form_trace_id` generalized from a
//! single `owner:repo:workflow:run_id` key to every (kind, natural-key)
//! combination the data model produces.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::correlator::Correlation;
use crate::model::{Conclusion, RunStatus};
use crate::reference::Reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Workflow,
    Job,
    Step,
    Marker,
}

impl SpanKind {
    fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Workflow => "workflow",
            SpanKind::Job => "job",
            SpanKind::Step => "step",
            SpanKind::Marker => "marker",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Str(value) => write!(f, "{value}"),
            AttributeValue::Int(value) => write!(f, "{value}"),
            AttributeValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// One exported span. `span_id`/`trace_id` are deterministic per §4.5 so two
/// runs over identical inputs yield byte-identical IDs.
#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub trace_id: u128,
    pub name: String,
    pub kind: SpanKind,
    pub start_at: OffsetDateTime,
    pub end_at: OffsetDateTime,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Span {
    pub fn is_marker(&self) -> bool {
        self.kind == SpanKind::Marker
    }
}

/// 128-bit hash of a Reference's canonical string — the Reference's trace
/// ID, shared by every span it produces.
pub fn trace_id_for_reference(reference: &Reference) -> u128 {
    let canonical = format!("{}:{}:{}:{}", reference.owner, reference.repo, reference.kind_label(), reference.identifier());
    hash_128(&canonical)
}

fn span_id_run(run_id: u64) -> u64 {
    hash_64(&format!("run:{run_id}"))
}

fn span_id_job(job_id: u64) -> u64 {
    hash_64(&format!("job:{job_id}"))
}

fn span_id_step(job_id: u64, ordinal: u32) -> u64 {
    hash_64(&format!("step:{job_id}:{ordinal}"))
}

fn span_id_marker(event_kind: &str, event_id: &str) -> u64 {
    hash_64(&format!("marker:{event_kind}:{event_id}"))
}

/// A marker's event identity — hashed over `(kind, actor, at, targetURL)`
/// per the SPEC_FULL.md §12 Open Question decision, so distinct source URLs
/// at the same timestamp stay distinct spans.
pub fn marker_event_id(kind: &str, actor: &str, at: OffsetDateTime, target_url: &str) -> String {
    let canonical = format!("{kind}:{actor}:{}:{target_url}", at.unix_timestamp());
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hash_64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"))
}

fn hash_128(input: &str) -> u128 {
    let digest = Sha256::digest(input.as_bytes());
    u128::from_be_bytes(digest[0..16].try_into().expect("sha256 digest is 32 bytes"))
}

fn conclusion_str(conclusion: Option<Conclusion>) -> &'static str {
    match conclusion {
        None => "",
        Some(Conclusion::Success) => "success",
        Some(Conclusion::Failure) => "failure",
        Some(Conclusion::Cancelled) => "cancelled",
        Some(Conclusion::Skipped) => "skipped",
        Some(Conclusion::Neutral) => "neutral",
        Some(Conclusion::TimedOut) => "timed_out",
        Some(Conclusion::ActionRequired) => "action_required",
        Some(Conclusion::StartupFailure) => "startup_failure",
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "queued",
        RunStatus::InProgress => "in_progress",
        RunStatus::Completed => "completed",
        RunStatus::Waiting => "waiting",
        RunStatus::Pending => "pending",
        RunStatus::Requested => "requested",
    }
}

/// Emits the full span set for one Reference's correlation result.
///
/// Markers are deduplicated by span ID; ties at equal timestamps are broken
/// so markers sort before workflow spans, per `spec.md` §4.5.
pub fn emit(reference: &Reference, correlation: &Correlation) -> Vec<Span> {
    let trace_id = trace_id_for_reference(reference);
    let mut spans = Vec::new();

    for run in &correlation.runs {
        let run_span_id = span_id_run(run.run.run_id);
        let mut attributes = HashMap::new();
        attributes.insert("github.conclusion".to_string(), conclusion_str(run.run.conclusion).into());
        attributes.insert("github.status".to_string(), status_str(run.run.status).into());
        attributes.insert("github.url".to_string(), run.run.html_url.clone().into());
        attributes.insert("github.repository".to_string(), format!("{}/{}", reference.owner, reference.repo).into());
        attributes.insert("github.run_id".to_string(), (run.run.run_id as i64).into());
        attributes.insert("github.source_url".to_string(), reference.display_url.clone().into());
        attributes.insert("github.source_name".to_string(), reference.display_name.clone().into());
        attributes.insert("github.url_index".to_string(), (reference.url_index as i64).into());
        attributes.insert("type".to_string(), SpanKind::Workflow.as_str().into());

        spans.push(Span {
            span_id: run_span_id,
            parent_span_id: None,
            trace_id,
            name: format!("Workflow: {}", run.run.name),
            kind: SpanKind::Workflow,
            start_at: run.run.started_at,
            end_at: run.run.effective_completed_at(),
            attributes,
        });

        for job in &run.jobs {
            let job_span_id = span_id_job(job.job_id);
            let mut attributes = HashMap::new();
            attributes.insert("github.conclusion".to_string(), conclusion_str(job.conclusion).into());
            attributes.insert("github.status".to_string(), status_str(job.status).into());
            attributes.insert("github.url".to_string(), job.html_url.clone().into());
            attributes.insert("github.job_name".to_string(), job.name.clone().into());
            attributes.insert("github.is_required".to_string(), job.is_required.into());
            attributes.insert("github.source_url".to_string(), reference.display_url.clone().into());
            attributes.insert("github.source_name".to_string(), reference.display_name.clone().into());
            attributes.insert("github.url_index".to_string(), (reference.url_index as i64).into());
            attributes.insert("type".to_string(), SpanKind::Job.as_str().into());

            spans.push(Span {
                span_id: job_span_id,
                parent_span_id: Some(run_span_id),
                trace_id,
                name: format!("Job: {}", job.name),
                kind: SpanKind::Job,
                start_at: job.started_at,
                end_at: job.effective_completed_at(),
                attributes,
            });

            for step in &job.steps {
                let step_span_id = span_id_step(job.job_id, step.ordinal);
                let mut attributes = HashMap::new();
                attributes.insert("github.conclusion".to_string(), conclusion_str(step.conclusion).into());
                attributes.insert("github.status".to_string(), status_str(step.status).into());
                attributes.insert("github.source_url".to_string(), reference.display_url.clone().into());
                attributes.insert("github.source_name".to_string(), reference.display_name.clone().into());
                attributes.insert("github.url_index".to_string(), (reference.url_index as i64).into());
                attributes.insert("type".to_string(), SpanKind::Step.as_str().into());

                let raw_start = step.started_at.unwrap_or(job.started_at);
                let raw_end = step.completed_at.unwrap_or(raw_start);

                // `spec.md` §3: a Step's interval must fall within its Job's
                // bounds; when it doesn't, clamp for rendering but keep the
                // raw values so a consumer can still see what GitHub reported.
                let job_start = job.started_at;
                let job_end = job.effective_completed_at();
                let start = raw_start.clamp(job_start, job_end);
                let end = raw_end.clamp(job_start, job_end);

                if start != raw_start {
                    attributes.insert("github.raw_started_at".to_string(), raw_start.to_string().into());
                }
                if end != raw_end {
                    attributes.insert("github.raw_completed_at".to_string(), raw_end.to_string().into());
                }

                spans.push(Span {
                    span_id: step_span_id,
                    parent_span_id: Some(job_span_id),
                    trace_id,
                    name: format!("Step: {}", step.name),
                    kind: SpanKind::Step,
                    start_at: start,
                    end_at: end,
                    attributes,
                });
            }
        }
    }

    let mut seen_marker_ids = std::collections::HashSet::new();
    for marker in &correlation.markers {
        let event_id = marker_event_id(marker.kind.label(), &marker.actor, marker.at, &marker.target_url);
        let marker_span_id = span_id_marker(marker.kind.label(), &event_id);
        if !seen_marker_ids.insert(marker_span_id) {
            continue;
        }

        let mut attributes = HashMap::new();
        attributes.insert("github.event_type".to_string(), marker.kind.label().into());
        attributes.insert("github.event_id".to_string(), event_id.into());
        attributes.insert("github.url".to_string(), marker.target_url.clone().into());
        attributes.insert("github.source_url".to_string(), reference.display_url.clone().into());
        attributes.insert("github.source_name".to_string(), reference.display_name.clone().into());
        attributes.insert("github.url_index".to_string(), (reference.url_index as i64).into());
        attributes.insert("type".to_string(), SpanKind::Marker.as_str().into());

        let name = if marker.kind == crate::model::ReviewKind::Merged {
            "Merge".to_string()
        } else {
            format!("Review: {}", marker.kind.label())
        };

        spans.push(Span {
            span_id: marker_span_id,
            parent_span_id: None,
            trace_id,
            name,
            kind: SpanKind::Marker,
            start_at: marker.at,
            end_at: marker.at,
            attributes,
        });
    }

    spans.sort_by(|a, b| match a.start_at.cmp(&b.start_at) {
        std::cmp::Ordering::Equal => b.is_marker().cmp(&a.is_marker()),
        other => other,
    });

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Reference, ReferenceKind};

    fn sample_reference() -> Reference {
        Reference {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            kind: ReferenceKind::Commit("abc123".to_string()),
            display_url: "acme/widgets/commit/abc123".to_string(),
            display_name: "acme/widgets#abc123".to_string(),
            url_index: 0,
        }
    }

    #[test]
    fn trace_id_is_deterministic() {
        let reference = sample_reference();
        assert_eq!(trace_id_for_reference(&reference), trace_id_for_reference(&reference));
    }

    #[test]
    fn distinct_references_hash_differently() {
        let a = sample_reference();
        let mut b = sample_reference();
        b.kind = ReferenceKind::Commit("def456".to_string());
        assert_ne!(trace_id_for_reference(&a), trace_id_for_reference(&b));
    }

    #[test]
    fn step_spans_clamp_to_their_jobs_bounds_and_record_the_raw_values() {
        use crate::correlator;
        use crate::model::{Conclusion, Job, RunStatus, Step, WorkflowRun};

        let job_start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let job_end = job_start + time::Duration::minutes(5);

        // A step reported as starting before its job and finishing after it
        // — GitHub occasionally reports this for steps on a rerun.
        let overflowing_step = Step {
            job_id: 1,
            ordinal: 1,
            name: "checkout".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: Some(job_start - time::Duration::minutes(1)),
            completed_at: Some(job_end + time::Duration::minutes(1)),
        };

        let run = WorkflowRun {
            run_id: 1,
            name: "CI".to_string(),
            head_sha: "abc123".to_string(),
            event: "push".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: job_start,
            completed_at: Some(job_end),
            html_url: String::new(),
        };
        let job = Job {
            job_id: 1,
            run_id: 1,
            name: "build".to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: job_start,
            completed_at: Some(job_end),
            runner_label: None,
            is_required: true,
            steps: vec![overflowing_step],
            html_url: String::new(),
        };

        let correlation = correlator::correlate(vec![run], vec![job], Vec::new());
        let reference = sample_reference();
        let spans = emit(&reference, &correlation);

        let step_span = spans.iter().find(|span| span.kind == SpanKind::Step).expect("step span present");
        assert_eq!(step_span.start_at, job_start);
        assert_eq!(step_span.end_at, job_end);
        assert!(step_span.attributes.contains_key("github.raw_started_at"));
        assert!(step_span.attributes.contains_key("github.raw_completed_at"));
    }

    #[test]
    fn marker_event_id_distinguishes_distinct_target_urls_at_same_instant() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let a = marker_event_id("approved", "alice", at, "https://github.com/acme/widgets/pull/1#review-1");
        let b = marker_event_id("approved", "alice", at, "https://github.com/acme/widgets/pull/1#review-2");
        assert_ne!(a, b);
    }

    #[test]
    fn marker_event_id_is_stable_for_identical_inputs() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let a = marker_event_id("merged", "bob", at, "https://github.com/acme/widgets/pull/1");
        let b = marker_event_id("merged", "bob", at, "https://github.com/acme/widgets/pull/1");
        assert_eq!(a, b);
    }
}
