//! Background task plumbing: cooperative cancellation, task state and the
//! scan → pregeneration pipeline.

pub mod pipeline;

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub use pipeline::{Pipeline, PipelineHandle, PipelineOptions, Watcher};

/// Shared stop signal, checked at walk entries, batch boundaries and
/// during inter-batch sleeps. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every sleeper.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` if the
    /// token was (or became) cancelled. A duration too large to represent
    /// as a deadline waits for cancellation alone.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = flag.lock().unwrap_or_else(|e| e.into_inner());

        while !*cancelled {
            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    match cvar.wait_timeout(cancelled, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(e) => e.into_inner().0,
                    }
                }
                None => cvar.wait(cancelled).unwrap_or_else(|e| e.into_inner()),
            };
        }
        false
    }
}

/// State of a background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl TaskState {
    pub fn is_running(&self) -> bool {
        *self == TaskState::Running
    }
}
