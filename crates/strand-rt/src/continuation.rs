//! Continuation tokens: move-only handles to suspended computations.
//!
//! A token is owned by exactly one party at a time: the ready queue that
//! produced it, the driver loop consuming that queue, or a worker thread it
//! was handed to. Ownership only moves by value.

use std::fmt;

use async_task::Runnable;

/// Identity of a task, stable across every continuation it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A suspended computation that is eligible to run.
///
/// Resumed at most once: [`resume`](Self::resume) consumes the token.
/// Dropping a token that was never resumed cancels the computation: its
/// future is dropped without being polled again.
pub struct Continuation {
    id: TaskId,
    runnable: Option<Runnable<TaskId>>,
}

impl Continuation {
    pub(crate) fn new(runnable: Runnable<TaskId>) -> Self {
        Self {
            id: *runnable.metadata(),
            runnable: Some(runnable),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the token has been resumed or released.
    pub fn is_completed(&self) -> bool {
        self.runnable.is_none()
    }

    /// Run the computation until its next suspension point.
    ///
    /// Returns `true` if the computation was woken again while it ran, in
    /// which case a fresh token for it is already queued. Returns `false` for
    /// a token that was already released.
    pub fn resume(mut self) -> bool {
        match self.runnable.take() {
            Some(runnable) => {
                tracing::trace!(task = %self.id, "resuming");
                runnable.run()
            }
            None => false,
        }
    }

    /// Cancel the computation without running it. Idempotent.
    pub fn release(&mut self) {
        if let Some(runnable) = self.runnable.take() {
            tracing::trace!(task = %self.id, "releasing unresumed continuation");
            drop(runnable);
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.id)
            .field("completed", &self.is_completed())
            .finish()
    }
}
