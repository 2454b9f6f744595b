//! OS-thread spawn/join for continuations.

use std::io;
use std::thread::{self, JoinHandle};

use crate::continuation::{Continuation, TaskId};
use crate::error::{Error, Result};

/// Optional attributes for the spawned thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadAttrs {
    pub name: Option<String>,
    pub stack_size: Option<usize>,
}

impl ThreadAttrs {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            stack_size: None,
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Owns at most one OS thread that resumes a single continuation.
///
/// Spawning is single-shot: a second `spawn` on the same worker is a usage
/// error even after the first thread was joined. The thread is joined at the
/// latest when the worker is dropped.
#[derive(Debug, Default)]
pub struct Worker {
    thread: Option<JoinHandle<bool>>,
    task: Option<TaskId>,
    spawned: bool,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    /// Start an OS thread that resumes `token` once.
    pub fn spawn(&mut self, token: Continuation, attrs: ThreadAttrs) -> Result<()> {
        if self.spawned {
            return Err(Error::usage("worker thread already spawned"));
        }
        let mut builder = thread::Builder::new();
        if let Some(name) = attrs.name {
            builder = builder.name(name);
        }
        if let Some(size) = attrs.stack_size {
            builder = builder.stack_size(size);
        }

        let task = token.id();
        let thread = builder
            .spawn(move || token.resume())
            .map_err(|e| Error::os("thread spawn", e))?;
        tracing::debug!(%task, "worker thread spawned");
        self.thread = Some(thread);
        self.task = Some(task);
        self.spawned = true;
        Ok(())
    }

    /// Wait for the thread to finish.
    ///
    /// Returns what [`Continuation::resume`] returned on that thread: `true`
    /// if the computation was rescheduled while it ran.
    pub fn join(&mut self) -> Result<bool> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| Error::usage("no worker thread to join"))?;
        thread.join().map_err(|_| {
            Error::os(
                "thread join",
                io::Error::other(format!("worker thread for {:?} panicked", self.task)),
            )
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        if let Err(err) = self.join() {
            tracing::error!(error = %err, "worker teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Driver;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn resumes_token_on_named_thread() {
        let driver = Driver::new().unwrap();
        let name = Arc::new(std::sync::Mutex::new(None));
        let name_clone = name.clone();
        let (token, task) = driver.prepare(async move {
            *name_clone.lock().unwrap() = thread::current().name().map(str::to_owned);
        });

        let mut worker = Worker::new();
        worker
            .spawn(token, ThreadAttrs::named("strand-worker").with_stack_size(256 * 1024))
            .unwrap();
        assert!(!worker.join().unwrap());
        assert!(task.is_finished());
        assert_eq!(name.lock().unwrap().as_deref(), Some("strand-worker"));
    }

    #[test]
    fn second_spawn_is_usage_error() {
        let driver = Driver::new().unwrap();
        let (first, _t1) = driver.prepare(async {});
        let (second, _t2) = driver.prepare(async {});

        let mut worker = Worker::new();
        worker.spawn(first, ThreadAttrs::default()).unwrap();
        worker.join().unwrap();
        let err = worker.spawn(second, ThreadAttrs::default()).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn join_without_spawn_is_usage_error() {
        let mut worker = Worker::new();
        assert!(matches!(worker.join(), Err(Error::Usage(_))));
    }

    #[test]
    fn drop_joins_thread() {
        let driver = Driver::new().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let (token, task) = driver.prepare(async move {
            std::thread::sleep(std::time::Duration::from_millis(10));
            ran_clone.store(true, Ordering::SeqCst);
        });
        task.detach();

        let mut worker = Worker::new();
        worker.spawn(token, ThreadAttrs::default()).unwrap();
        drop(worker);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_computation_surfaces_on_join() {
        let driver = Driver::new().unwrap();
        let (token, task) = driver.prepare(async {
            panic!("boom");
        });
        task.detach();

        let mut worker = Worker::new();
        worker.spawn(token, ThreadAttrs::default()).unwrap();
        assert!(matches!(worker.join(), Err(Error::Os { op: "thread join", .. })));
    }
}
