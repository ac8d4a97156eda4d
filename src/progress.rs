//! Progress Reporter (`spec.md` §4.3, §4.7): a strict observer the Planner
//! and Correlator call into. The core never reads state back from it.

use std::sync::Mutex;

use tracing::info;

/// Callback contract driven by the Planner. Implementations must serialize
/// their own updates — multiple Planner workers call in from different
/// tasks.
pub trait ProgressReporter: Send + Sync {
    fn start_url(&self, index: usize, total: usize, url: &str);
    fn set_url_runs(&self, count: usize);
    fn set_phase(&self, name: &str);
    fn set_detail(&self, text: &str);
    fn process_run(&self);
    fn finish(&self);
}

/// Reports nothing. Used by library callers and tests that don't want
/// console output.
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn start_url(&self, _index: usize, _total: usize, _url: &str) {}
    fn set_url_runs(&self, _count: usize) {}
    fn set_phase(&self, _name: &str) {}
    fn set_detail(&self, _text: &str) {}
    fn process_run(&self) {}
    fn finish(&self) {}
}

/// Serializes updates onto a single line of structured log output, the way
/// the teacher's `main.rs` prints retrieval progress inline.
pub struct TracingProgress {
    state: Mutex<String>,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self { state: Mutex::new(String::new()) }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TracingProgress {
    fn start_url(&self, index: usize, total: usize, url: &str) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        *state = url.to_string();
        info!(index, total, url, "starting reference");
    }

    fn set_url_runs(&self, count: usize) {
        let state = self.state.lock().expect("progress lock poisoned");
        info!(url = %*state, runs = count, "discovered workflow runs");
    }

    fn set_phase(&self, name: &str) {
        let state = self.state.lock().expect("progress lock poisoned");
        info!(url = %*state, phase = name, "phase");
    }

    fn set_detail(&self, text: &str) {
        let state = self.state.lock().expect("progress lock poisoned");
        info!(url = %*state, detail = text, "detail");
    }

    fn process_run(&self) {
        let state = self.state.lock().expect("progress lock poisoned");
        info!(url = %*state, "processed run");
    }

    fn finish(&self) {
        let state = self.state.lock().expect("progress lock poisoned");
        info!(url = %*state, "reference finished");
    }
}
