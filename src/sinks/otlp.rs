//! OTLP sinks (HTTP and gRPC) — both via `opentelemetry-otlp`, exactly the
//! crate and feature set the teacher already depends on (`grpc-tonic` for
//! gRPC, `http-proto` for HTTP). Converts our deterministic [`Span`]s
//! straight into `SpanData` and hands them to the chosen exporter, the way
//! the teacher's `establish_root_span`/`display_job_steps` build a
//! `SpanContext` with a deterministic trace ID rather than letting the SDK
//! mint a random one.

use std::borrow::Cow;
use std::time::SystemTime;

use async_trait::async_trait;
use opentelemetry::trace::{SpanContext, SpanId, SpanKind as OtelSpanKind, Status, TraceFlags, TraceId, TraceState};
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_otlp::{Protocol, SpanExporter as OtlpExporterBuilder, WithExportConfig};
use opentelemetry_sdk::export::trace::{SpanData, SpanEvents, SpanLinks};
use opentelemetry_sdk::trace::SpanExporter;
use tokio::sync::Mutex;

use crate::pipeline::Sink;
use crate::span::{self, Span as OurSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Grpc,
    Http,
}

pub struct OtlpSink {
    name: &'static str,
    exporter: Mutex<Box<dyn SpanExporter>>,
    scope: InstrumentationScope,
}

impl OtlpSink {
    pub fn new(transport: Transport, endpoint: &str) -> Result<Self, anyhow::Error> {
        let exporter: Box<dyn SpanExporter> = match transport {
            Transport::Grpc => Box::new(OtlpExporterBuilder::builder().with_tonic().with_endpoint(endpoint).build()?),
            Transport::Http => Box::new(
                OtlpExporterBuilder::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_protocol(Protocol::HttpBinary)
                    .build()?,
            ),
        };

        Ok(Self {
            name: match transport {
                Transport::Grpc => "otlp-grpc",
                Transport::Http => "otlp-http",
            },
            exporter: Mutex::new(exporter),
            scope: InstrumentationScope::builder("gha-causal-trace").build(),
        })
    }

    fn to_span_data(&self, span: &OurSpan) -> SpanData {
        let trace_id = TraceId::from_bytes(span.trace_id.to_be_bytes());
        let span_id = SpanId::from_bytes(span.span_id.to_be_bytes());
        let parent_span_id = span.parent_span_id.map(|id| SpanId::from_bytes(id.to_be_bytes())).unwrap_or(SpanId::INVALID);

        let span_context = SpanContext::new(trace_id, span_id, TraceFlags::SAMPLED, false, TraceState::default());

        let attributes: Vec<KeyValue> = span
            .attributes
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.to_string()))
            .collect();

        SpanData {
            span_context,
            parent_span_id,
            span_kind: OtelSpanKind::Internal,
            name: Cow::Owned(span.name.clone()),
            start_time: system_time_from(span.start_at),
            end_time: system_time_from(span.end_at),
            attributes,
            dropped_attributes_count: 0,
            events: SpanEvents::default(),
            links: SpanLinks::default(),
            status: Status::Ok,
            instrumentation_scope: self.scope.clone(),
        }
    }
}

fn system_time_from(instant: time::OffsetDateTime) -> SystemTime {
    SystemTime::UNIX_EPOCH + std::time::Duration::from_nanos(instant.unix_timestamp_nanos().max(0) as u64)
}

#[async_trait]
impl Sink for OtlpSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn export(&self, spans: &[OurSpan]) -> Result<(), anyhow::Error> {
        let mut ordered: Vec<OurSpan> = spans.to_vec();
        stable_order(&mut ordered);
        let batch: Vec<SpanData> = ordered.iter().map(|span| self.to_span_data(span)).collect();
        let mut exporter = self.exporter.lock().await;
        exporter.export(batch).await.map_err(|error| anyhow::anyhow!("otlp export failed: {error}"))
    }

    async fn finish(&self) -> Result<(), anyhow::Error> {
        let mut exporter = self.exporter.lock().await;
        exporter.shutdown().map_err(|error| anyhow::anyhow!("otlp shutdown failed: {error}"))
    }
}

/// Dedup/sort helper shared with the other presentation sinks: markers
/// before workflow spans at equal timestamps, matching `span::emit`'s own
/// ordering so OTLP export sees the same waterfall order.
pub fn stable_order(spans: &mut [OurSpan]) {
    spans.sort_by(|a, b| match a.start_at.cmp(&b.start_at) {
        std::cmp::Ordering::Equal => b.is_marker().cmp(&a.is_marker()),
        other => other,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn stable_order_is_idempotent() {
        let mut spans = vec![];
        let base = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        spans.push(OurSpan {
            span_id: 1,
            parent_span_id: None,
            trace_id: 1,
            name: "Workflow: CI".to_string(),
            kind: span::SpanKind::Workflow,
            start_at: base,
            end_at: base,
            attributes: HashMap::new(),
        });
        stable_order(&mut spans);
        let once = spans.clone();
        stable_order(&mut spans);
        assert_eq!(once.len(), spans.len());
    }
}
