//! Per-job automation states and the cancellation token.
//!
//! A job attempt moves through: Pending → Starting → OpeningApp →
//! LoadingProject → Exporting → Completed | Failed. Every retry starts over
//! at Pending. Cancelled preempts any state and is never left.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationState {
    Pending,
    Starting,
    OpeningApp,
    LoadingProject,
    Exporting,
    Completed,
    Failed,
    Cancelled,
}

impl AutomationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AutomationState::Completed | AutomationState::Failed | AutomationState::Cancelled
        )
    }
}

impl std::fmt::Display for AutomationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutomationState::Pending => write!(f, "pending"),
            AutomationState::Starting => write!(f, "starting"),
            AutomationState::OpeningApp => write!(f, "opening_app"),
            AutomationState::LoadingProject => write!(f, "loading_project"),
            AutomationState::Exporting => write!(f, "exporting"),
            AutomationState::Completed => write!(f, "completed"),
            AutomationState::Failed => write!(f, "failed"),
            AutomationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Cooperative cancellation shared between the controller and the worker.
///
/// Clones share the same flag. [`sleep`](Self::sleep) wakes as soon as the
/// token is cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        if let Ok(mut cancelled) = flag.lock() {
            *cancelled = true;
        }
        signal.notify_all();
    }

    pub fn reset(&self) {
        if let Ok(mut cancelled) = self.inner.0.lock() {
            *cancelled = false;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().map(|c| *c).unwrap_or(true)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (flag, signal) = &*self.inner;
        let Ok(mut cancelled) = flag.lock() else {
            return false;
        };
        loop {
            if *cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            cancelled = match signal.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
    }
}
