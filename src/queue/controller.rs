//! Job queue controller.
//!
//! Runs jobs one at a time on a background worker thread and exposes
//! pause / resume / cancel plus progress snapshots. Counters always satisfy
//! `completed + failed + remaining == total`; a job stays in `remaining`
//! while it is in flight.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::job::{HistorySink, Job, JobOutcome};
use crate::automation::{AutomationConfig, AutomationEngine, AutomationState, CancelToken, HostCallbacks};
use crate::diagnostics::{panic_message, Diagnostics, Severity};
use crate::platform::Capabilities;
use crate::vision::TemplateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Idle => write!(f, "idle"),
            QueueState::Running => write!(f, "running"),
            QueueState::Paused => write!(f, "paused"),
            QueueState::Cancelled => write!(f, "cancelled"),
            QueueState::Completed => write!(f, "completed"),
        }
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueProgress {
    pub state: QueueState,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    pub current_job: Option<String>,
}

/// Summary numbers for a run.
#[derive(Debug, Clone)]
pub struct QueueStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    /// Completed share of finished jobs, 0.0 when none finished
    pub success_rate: f32,
    pub elapsed: Duration,
    pub failed_jobs: Vec<String>,
}

struct QueueInner {
    state: QueueState,
    queue: VecDeque<Job>,
    current: Option<Job>,
    total: usize,
    completed: usize,
    failed: usize,
    failed_jobs: Vec<String>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    engine: Option<Arc<AutomationEngine>>,
    worker_active: bool,
}

impl QueueInner {
    fn remaining(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    fn summary(&self) -> String {
        let mut summary = format!("Exported {} of {} projects", self.completed, self.total);
        if self.failed > 0 {
            summary.push_str(&format!(
                "; {} failed: {}",
                self.failed,
                self.failed_jobs.join(", ")
            ));
        }
        summary
    }
}

struct Shared {
    config: AutomationConfig,
    caps: Capabilities,
    templates: Option<Arc<TemplateStore>>,
    diagnostics: Arc<Diagnostics>,
    callbacks: HostCallbacks,
    history: Option<Arc<dyn HistorySink>>,
    inner: Mutex<QueueInner>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panicking job never holds this lock, so poisoning is recoverable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct JobQueueController {
    shared: Arc<Shared>,
}

impl JobQueueController {
    pub fn new(
        config: AutomationConfig,
        caps: Capabilities,
        templates: Option<Arc<TemplateStore>>,
        diagnostics: Arc<Diagnostics>,
        callbacks: HostCallbacks,
    ) -> Self {
        diagnostics.set_log_sink(callbacks.log.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                caps,
                templates,
                diagnostics,
                callbacks,
                history: None,
                inner: Mutex::new(QueueInner {
                    state: QueueState::Idle,
                    queue: VecDeque::new(),
                    current: None,
                    total: 0,
                    completed: 0,
                    failed: 0,
                    failed_jobs: Vec::new(),
                    started_at: None,
                    finished_at: None,
                    engine: None,
                    worker_active: false,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Records job events to `history`. Must be called before [`start`](Self::start).
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.history = Some(history);
        }
        self
    }

    /// Starts processing `jobs` in order on a new worker.
    ///
    /// Returns `false` if a run is active, `jobs` is empty, or the
    /// application executable does not exist.
    pub fn start(&self, jobs: Vec<Job>) -> bool {
        let shared = &self.shared;
        let total = jobs.len();
        let engine = match self.prepare_run(jobs) {
            Ok(engine) => engine,
            Err(reason) => {
                shared.diagnostics.record(Severity::Warning, "start", &reason, None);
                return false;
            }
        };

        shared
            .diagnostics
            .log(&format!("Starting queue with {} project(s)", total));
        self.spawn_worker(engine);
        true
    }

    /// Resets the counters for a new run and builds its engine.
    fn prepare_run(&self, jobs: Vec<Job>) -> Result<Arc<AutomationEngine>, String> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if matches!(inner.state, QueueState::Running | QueueState::Paused) || inner.worker_active {
            return Err("Queue is already running".to_string());
        }
        if jobs.is_empty() {
            return Err("No projects to export".to_string());
        }
        let exe = &shared.config.app.exe_path;
        if !exe.is_file() {
            return Err(format!("Application not found: {}", exe.display()));
        }

        let engine = Arc::new(AutomationEngine::new(
            shared.config.clone(),
            shared.caps.clone(),
            shared.templates.clone(),
            Arc::clone(&shared.diagnostics),
            shared.callbacks.clone(),
            CancelToken::new(),
        ));

        inner.total = jobs.len();
        inner.queue = jobs.into();
        inner.current = None;
        inner.completed = 0;
        inner.failed = 0;
        inner.failed_jobs.clear();
        inner.started_at = Some(Instant::now());
        inner.finished_at = None;
        inner.engine = Some(Arc::clone(&engine));
        inner.state = QueueState::Running;
        inner.worker_active = true;
        Ok(engine)
    }

    /// Stops after the in-flight job finishes.
    pub fn pause(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.state != QueueState::Running {
            return false;
        }
        inner.state = QueueState::Paused;
        drop(inner);
        self.shared.diagnostics.log("Queue paused");
        true
    }

    /// Continues a paused run on the same queue.
    pub fn resume(&self) -> bool {
        let engine = {
            let mut inner = self.shared.lock();
            if inner.state != QueueState::Paused {
                return false;
            }
            inner.state = QueueState::Running;
            // The previous worker may still be finishing its job; it then carries on
            if inner.worker_active {
                None
            } else {
                inner.worker_active = true;
                inner.engine.clone()
            }
        };

        self.shared.diagnostics.log("Queue resumed");
        if let Some(engine) = engine {
            self.spawn_worker(engine);
        }
        true
    }

    /// Cancels the run: aborts the in-flight job, closes the application and
    /// drops every queued job.
    ///
    /// Drained jobs and the in-flight job are counted as failed.
    pub fn cancel(&self) -> bool {
        let (engine, dropped, summary) = {
            let mut inner = self.shared.lock();
            if !matches!(inner.state, QueueState::Running | QueueState::Paused) {
                return false;
            }
            inner.state = QueueState::Cancelled;
            inner.finished_at = Some(Instant::now());

            let mut names: Vec<String> = inner.current.take().into_iter().map(|j| j.name).collect();
            names.extend(inner.queue.drain(..).map(|j| j.name));
            inner.failed += names.len();
            inner.failed_jobs.extend(names.iter().cloned());
            (inner.engine.clone(), names.len(), inner.summary())
        };

        if let Some(engine) = engine {
            engine.cancel();
            engine.close_app();
        }
        self.shared
            .diagnostics
            .log(&format!("Queue cancelled, {} project(s) not exported", dropped));
        self.shared
            .callbacks
            .completion(false, &format!("Cancelled. {}", summary));
        true
    }

    pub fn state(&self) -> QueueState {
        self.shared.lock().state
    }

    pub fn progress(&self) -> QueueProgress {
        let inner = self.shared.lock();
        QueueProgress {
            state: inner.state,
            total: inner.total,
            completed: inner.completed,
            failed: inner.failed,
            remaining: inner.remaining(),
            current_job: inner.current.as_ref().map(|j| j.name.clone()),
        }
    }

    pub fn statistics(&self) -> QueueStatistics {
        let inner = self.shared.lock();
        let finished = inner.completed + inner.failed;
        let elapsed = match (inner.started_at, inner.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        QueueStatistics {
            total: inner.total,
            completed: inner.completed,
            failed: inner.failed,
            remaining: inner.remaining(),
            success_rate: if finished == 0 {
                0.0
            } else {
                inner.completed as f32 / finished as f32
            },
            elapsed,
            failed_jobs: inner.failed_jobs.clone(),
        }
    }

    /// Names of the jobs that failed or were dropped by cancellation.
    pub fn failed_jobs(&self) -> Vec<String> {
        self.shared.lock().failed_jobs.clone()
    }

    /// Blocks until no worker is running or `timeout` passes.
    ///
    /// Returns `true` if the worker is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        match self
            .shared
            .idle
            .wait_timeout_while(inner, timeout, |i| i.worker_active)
        {
            Ok((inner, _)) => !inner.worker_active,
            Err(e) => !e.into_inner().0.worker_active,
        }
    }

    /// Blocks until the worker has stopped, cancelling the run as soon as
    /// `interrupt` is raised. `interrupt` is checked every `poll`.
    pub fn wait_interruptible(&self, interrupt: &AtomicBool, poll: Duration) {
        while !self.wait_idle(poll) {
            if interrupt.swap(false, Ordering::SeqCst) {
                self.shared.diagnostics.log("Interrupted, cancelling the run");
                self.cancel();
            }
        }
    }

    fn spawn_worker(&self, engine: Arc<AutomationEngine>) {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            run_worker(&shared, &engine);
            shared.idle.notify_all();
        });
    }
}

impl Drop for JobQueueController {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Drains the queue while the run stays `Running`.
fn run_worker(shared: &Shared, engine: &AutomationEngine) {
    let attempts = shared.config.retry.attempts;

    loop {
        let (job, index, total) = {
            let mut inner = shared.lock();
            let next = if inner.state == QueueState::Running {
                inner.queue.pop_front()
            } else {
                None
            };
            let Some(job) = next else {
                finalize(shared, inner);
                return;
            };
            inner.current = Some(job.clone());
            (job, inner.completed + inner.failed + 1, inner.total)
        };

        shared.callbacks.progress(index, total, &job.name);
        shared
            .callbacks
            .status(AutomationState::Starting, &format!("Starting {}", job.name));
        shared
            .diagnostics
            .log(&format!("[{}/{}] Exporting {}", index, total, job.name));

        let history_id = shared.history.as_ref().and_then(|h| h.job_started(&job));
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.export_job(&job, attempts)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                shared.diagnostics.record(
                    Severity::Critical,
                    "export_job",
                    &format!("{} panicked: {}", job.name, message),
                    None,
                );
                JobOutcome::Failed(format!("panic: {}", message))
            });

        if let (Some(history), Some(id)) = (&shared.history, &history_id) {
            history.job_finished(id, &job, &outcome, started.elapsed());
        }

        let mut inner = shared.lock();
        // Cancellation already accounted for the in-flight job
        if inner.current.take().is_none() {
            continue;
        }
        match &outcome {
            JobOutcome::Completed => {
                inner.completed += 1;
                drop(inner);
                shared.diagnostics.log(&format!("Exported {}", job.name));
            }
            JobOutcome::Failed(reason) => {
                inner.failed += 1;
                inner.failed_jobs.push(job.name.clone());
                drop(inner);
                shared
                    .diagnostics
                    .log(&format!("Failed to export {}: {}", job.name, reason));
            }
            JobOutcome::Cancelled => {
                inner.failed += 1;
                inner.failed_jobs.push(job.name.clone());
            }
        }
    }
}

/// Ends the worker. A run that drained while `Running` is completed.
fn finalize(shared: &Shared, mut inner: MutexGuard<'_, QueueInner>) {
    inner.worker_active = false;
    match inner.state {
        QueueState::Running => {
            inner.state = QueueState::Completed;
            inner.finished_at = Some(Instant::now());
            let success = inner.failed == 0;
            let summary = inner.summary();
            drop(inner);
            shared.diagnostics.log(&summary);
            shared.callbacks.completion(success, &summary);
        }
        QueueState::Paused => {
            let remaining = inner.remaining();
            drop(inner);
            shared
                .diagnostics
                .log(&format!("Worker stopped, {} project(s) remaining", remaining));
        }
        _ => {}
    }
}
