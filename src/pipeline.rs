//! Pipeline (`spec.md` §4.6): a broadcast multiplexer over registered
//! exporter sinks.

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::error;

use crate::error::SinkError;
use crate::span::Span;

/// A single exporter. `export` may be called many times with successive
/// span batches; `finish` is called exactly once, at the end of a run.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn export(&self, spans: &[Span]) -> Result<(), anyhow::Error>;
    async fn finish(&self) -> Result<(), anyhow::Error>;
}

/// Holds registered sinks behind a reader-preferring lock, so dynamic
/// registration is safe against a concurrent `process` call, per
/// `spec.md` §4.6.
pub struct Pipeline {
    sinks: RwLock<Vec<Box<dyn Sink>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { sinks: RwLock::new(Vec::new()) }
    }

    pub async fn register(&self, sink: Box<dyn Sink>) {
        self.sinks.write().await.push(sink);
    }

    /// Dispatches `export` to every sink in parallel, waits for all, and
    /// returns the first error encountered — but never cancels the others.
    pub async fn process(&self, spans: &[Span]) -> Result<(), SinkError> {
        let sinks = self.sinks.read().await;
        let results = join_all(sinks.iter().map(|sink| async move {
            let result = sink.export(spans).await;
            (sink.name().to_string(), result)
        }))
        .await;

        let mut first_error = None;
        for (name, result) in results {
            if let Err(source) = result {
                error!(sink = %name, %source, "sink export failed");
                if first_error.is_none() {
                    first_error = Some(SinkError { sink: name, source });
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Calls `finish` on every sink sequentially, in registration order.
    /// The first error short-circuits and is returned.
    pub async fn finish(&self) -> Result<(), SinkError> {
        let sinks = self.sinks.read().await;
        for sink in sinks.iter() {
            if let Err(source) = sink.finish().await {
                return Err(SinkError { sink: sink.name().to_string(), source });
            }
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        name: String,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn export(&self, _spans: &[Span]) -> Result<(), anyhow::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("export failed for {}", self.name);
            }
            Ok(())
        }

        async fn finish(&self) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_prevent_others_from_receiving_spans() {
        let pipeline = Pipeline::new();
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));

        pipeline.register(Box::new(CountingSink { name: "a".to_string(), calls: Arc::clone(&a_calls), fail: false })).await;
        pipeline.register(Box::new(CountingSink { name: "b".to_string(), calls: Arc::clone(&b_calls), fail: true })).await;

        let result = pipeline.process(&[]).await;

        assert!(result.is_err());
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finish_runs_every_sink_in_registration_order() {
        let pipeline = Pipeline::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pipeline.register(Box::new(CountingSink { name: "a".to_string(), calls: Arc::clone(&calls), fail: false })).await;
        pipeline.register(Box::new(CountingSink { name: "b".to_string(), calls: Arc::clone(&calls), fail: false })).await;

        assert!(pipeline.finish().await.is_ok());
    }
}
