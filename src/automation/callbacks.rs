//! Callbacks through which the host observes a run.
//!
//! All of them fire on the worker thread.

use std::sync::Arc;

use crate::automation::AutomationState;
use crate::diagnostics::LogCallback;

/// `(current, total, job_name)`, with `current` counting from 1.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(AutomationState, &str) + Send + Sync>;
/// `(success, summary)`
pub type CompletionCallback = Arc<dyn Fn(bool, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct HostCallbacks {
    pub log: Option<LogCallback>,
    pub progress: Option<ProgressCallback>,
    pub status: Option<StatusCallback>,
    pub completion: Option<CompletionCallback>,
}

impl HostCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(usize, usize, &str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(AutomationState, &str) + Send + Sync + 'static) -> Self {
        self.status = Some(Arc::new(f));
        self
    }

    pub fn on_completion(mut self, f: impl Fn(bool, &str) + Send + Sync + 'static) -> Self {
        self.completion = Some(Arc::new(f));
        self
    }

    pub(crate) fn progress(&self, current: usize, total: usize, job_name: &str) {
        if let Some(cb) = &self.progress {
            cb(current, total, job_name);
        }
    }

    pub(crate) fn status(&self, state: AutomationState, message: &str) {
        if let Some(cb) = &self.status {
            cb(state, message);
        }
    }

    pub(crate) fn completion(&self, success: bool, summary: &str) {
        if let Some(cb) = &self.completion {
            cb(success, summary);
        }
    }
}
