//! Markdown renderer — reuses the terminal report's data model to emit a
//! Markdown table instead of plain indented text.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::pipeline::Sink;
use crate::span::{Span, SpanKind};

pub struct MarkdownSink {
    output_path: PathBuf,
    rows: Mutex<Vec<Span>>,
}

impl MarkdownSink {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path, rows: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Sink for MarkdownSink {
    fn name(&self) -> &str {
        "markdown"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), anyhow::Error> {
        self.rows.lock().await.extend_from_slice(spans);
        Ok(())
    }

    async fn finish(&self) -> Result<(), anyhow::Error> {
        let rows = self.rows.lock().await;
        let mut doc = String::from("| kind | name | duration (ms) | conclusion |\n|---|---|---|---|\n");
        for span in rows.iter() {
            let kind = match span.kind {
                SpanKind::Workflow => "workflow",
                SpanKind::Job => "job",
                SpanKind::Step => "step",
                SpanKind::Marker => "marker",
            };
            let duration = (span.end_at - span.start_at).whole_milliseconds();
            let conclusion = span.attributes.get("github.conclusion").map(|value| value.to_string()).unwrap_or_default();
            doc.push_str(&format!("| {kind} | {} | {duration} | {conclusion} |\n", span.name));
        }
        fs::write(&self.output_path, doc).await?;
        Ok(())
    }
}
