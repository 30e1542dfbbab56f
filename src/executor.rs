//! Task submission interface and trivial executors.
//!
//! The crate never owns a thread pool; call sites that need to run work off
//! the current thread submit it through [`Executor`]. Rejection is a value,
//! not a panic: each call site decides whether to fall back to inline
//! execution or to safe-close the resource it was dispatching for.

use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// A task ready to run.
pub type Task = Box<dyn FnOnce() + Send>;

/// Error returned when an executor refuses a task (queue full, shut down).
#[derive(Debug, Clone, ThisError)]
#[error("task rejected: {reason}")]
pub struct RejectedError {
    /// Why the executor refused.
    pub reason: &'static str,
}

impl RejectedError {
    /// Creates a rejection with the given reason.
    #[must_use]
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Submits tasks for execution.
pub trait Executor: Send + Sync {
    /// Submits a task.
    ///
    /// # Errors
    ///
    /// Fails with [`RejectedError`] when the task cannot be accepted; the
    /// task is dropped.
    fn execute(&self, task: Task) -> Result<(), RejectedError>;
}

/// Runs every task inline on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        task();
        Ok(())
    }
}

impl fmt::Display for DirectExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("direct executor")
    }
}

/// Accepts and silently drops every task.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExecutor;

impl Executor for NullExecutor {
    fn execute(&self, _task: Task) -> Result<(), RejectedError> {
        Ok(())
    }
}

impl fmt::Display for NullExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null executor")
    }
}

/// Returns the shared direct executor.
#[must_use]
pub fn direct_executor() -> Arc<dyn Executor> {
    Arc::new(DirectExecutor)
}

/// Returns the shared null executor.
#[must_use]
pub fn null_executor() -> Arc<dyn Executor> {
    Arc::new(NullExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn direct_executor_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        direct_executor()
            .execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn null_executor_drops_tasks() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        null_executor()
            .execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
