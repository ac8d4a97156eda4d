//! Terminal report — the direct descendant of the teacher's
//! `println!`-based `display_job_steps`: a nested summary of each
//! Reference's workflow/job/step tree as spans arrive.

use async_trait::async_trait;

use crate::pipeline::Sink;
use crate::span::{Span, SpanKind};

pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for TerminalSink {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), anyhow::Error> {
        for span in spans {
            let indent = match span.kind {
                SpanKind::Workflow => 0,
                SpanKind::Job => 2,
                SpanKind::Step => 4,
                SpanKind::Marker => 0,
            };
            let duration = span.end_at - span.start_at;
            println!("{:indent$}{} ({}ms)", "", span.name, duration.whole_milliseconds(), indent = indent);
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), anyhow::Error> {
        println!("--- done ---");
        Ok(())
    }
}
