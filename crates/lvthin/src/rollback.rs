//! Compensating actions for multi-step operations.
//!
//! Each step that leaves state behind registers how to undo it. When a
//! later step fails the registered actions run newest first. Unwinding
//! stops at the first compensation that fails, since the ones before it
//! usually depend on it (a volume cannot be removed while still mounted).

use lvthin_common::{ThinError, ThinResult};

type Compensation<'a> = Box<dyn FnOnce() -> ThinResult<()> + 'a>;

/// Ordered list of compensating actions.
#[must_use = "a rollback does nothing unless committed or unwound"]
pub struct Rollback<'a> {
    operation: &'static str,
    steps: Vec<(&'static str, Compensation<'a>)>,
}

impl<'a> Rollback<'a> {
    /// Start tracking compensations for `operation`.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    /// Register how to undo the step that just succeeded.
    pub fn push(&mut self, label: &'static str, undo: impl FnOnce() -> ThinResult<()> + 'a) {
        self.steps.push((label, Box::new(undo)));
    }

    /// The operation succeeded; forget every compensation.
    pub fn commit(self) {
        tracing::trace!(operation = self.operation, steps = self.steps.len(), "Committed");
    }

    /// Undo registered steps after `err`, returning the error to report.
    ///
    /// A clean unwind returns `err` unchanged. If a compensation fails the
    /// result is a [`ThinError::PartialFailure`] holding both errors.
    pub fn unwind(self, err: ThinError) -> ThinError {
        let operation = self.operation;
        tracing::debug!(operation, err = %err, "Rolling back");

        for (label, undo) in self.steps.into_iter().rev() {
            if let Err(cleanup) = undo() {
                tracing::warn!(operation, step = label, err = %cleanup, "Rollback step failed");
                return err.with_cleanup(cleanup);
            }
            tracing::debug!(operation, step = label, "Rolled back");
        }
        err
    }
}
