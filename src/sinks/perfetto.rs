//! Perfetto trace writer — serializes the span bag to Chrome/Perfetto's
//! JSON trace-event format. No dedicated crate appears anywhere in the
//! corpus for this format, so it's plain `serde_json` over a small local
//! event struct, the same way the teacher reaches for `serde_json::Value`
//! ad hoc in `main.rs` rather than a typed GitHub response model.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::pipeline::Sink;
use crate::span::{Span, SpanKind};

#[derive(Serialize)]
struct TraceEvent {
    name: String,
    cat: &'static str,
    ph: &'static str,
    ts: i64,
    dur: i64,
    pid: u64,
    tid: u64,
    id: String,
}

#[derive(Serialize)]
struct TraceFile {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent>,
}

pub struct PerfettoSink {
    output_path: PathBuf,
    spans: Mutex<Vec<Span>>,
}

impl PerfettoSink {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path, spans: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Sink for PerfettoSink {
    fn name(&self) -> &str {
        "perfetto"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), anyhow::Error> {
        self.spans.lock().await.extend_from_slice(spans);
        Ok(())
    }

    async fn finish(&self) -> Result<(), anyhow::Error> {
        let spans = self.spans.lock().await;
        let trace_events = spans
            .iter()
            .map(|span| {
                let cat = match span.kind {
                    SpanKind::Workflow => "workflow",
                    SpanKind::Job => "job",
                    SpanKind::Step => "step",
                    SpanKind::Marker => "marker",
                };
                TraceEvent {
                    name: span.name.clone(),
                    cat,
                    ph: "X",
                    ts: span.start_at.unix_timestamp_nanos() as i64 / 1_000,
                    dur: (span.end_at - span.start_at).whole_microseconds() as i64,
                    pid: (span.trace_id >> 64) as u64,
                    tid: span.parent_span_id.unwrap_or(span.span_id),
                    id: format!("{:016x}", span.span_id),
                }
            })
            .collect();

        let file = TraceFile { trace_events };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.output_path, json).await?;
        Ok(())
    }
}
