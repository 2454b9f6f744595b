//! The ready-queue protocol.
//!
//! A ready queue hands out finite batches of continuations that may run now.
//! Whoever receives a batch resumes each token exactly once; tokens left in a
//! dropped batch are released, which cancels their computations.

use std::collections::VecDeque;
use std::time::Duration;

use concurrent_queue::{ConcurrentQueue, PushError};

use crate::continuation::Continuation;
use crate::error::Result;

/// Source of runnable continuations.
///
/// Implementations never resume a token themselves; they only hand tokens
/// to the caller of [`ready`](Self::ready).
pub trait ReadyQueue {
    /// Wait up to `timeout` (`None` = unbounded) for at least one continuation
    /// and return everything that became runnable. May return an empty set on
    /// timeout.
    fn ready(&self, timeout: Option<Duration>) -> Result<ReadySet>;
}

/// A finite, ordered batch of continuations produced by one `ready()` call.
#[derive(Debug, Default)]
pub struct ReadySet {
    tokens: VecDeque<Continuation>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Continuation) {
        self.tokens.push_back(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resume every token in order. Returns how many were resumed.
    pub fn resume_all(self) -> usize {
        let mut resumed = 0;
        for token in self {
            token.resume();
            resumed += 1;
        }
        resumed
    }
}

impl Iterator for ReadySet {
    type Item = Continuation;

    fn next(&mut self) -> Option<Continuation> {
        self.tokens.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.tokens.len(), Some(self.tokens.len()))
    }
}

impl ExactSizeIterator for ReadySet {}

impl FromIterator<Continuation> for ReadySet {
    fn from_iter<I: IntoIterator<Item = Continuation>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// Ready queue fed by explicit signals.
///
/// Wakers push continuations here from any thread; the consumer drains them
/// in arrival order. `ready()` on a bare `SignalQueue` never blocks: it only
/// reports what is already queued. Blocking waits belong to the driver,
/// which pairs this queue with a reactor.
pub struct SignalQueue {
    queue: ConcurrentQueue<Continuation>,
    max_batch: usize,
}

impl SignalQueue {
    pub fn new(max_batch: usize) -> Self {
        Self {
            queue: ConcurrentQueue::unbounded(),
            max_batch: max_batch.max(1),
        }
    }

    /// Queue a continuation. Returns it back if the queue was closed.
    pub fn signal(&self, token: Continuation) -> std::result::Result<(), Continuation> {
        match self.queue.push(token) {
            Ok(()) => Ok(()),
            Err(PushError::Closed(token)) | Err(PushError::Full(token)) => Err(token),
        }
    }

    pub fn pop(&self) -> Option<Continuation> {
        self.queue.pop().ok()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take up to one batch of queued continuations.
    pub fn drain_batch(&self) -> ReadySet {
        let mut set = ReadySet::new();
        while set.len() < self.max_batch {
            match self.queue.pop() {
                Ok(token) => set.push(token),
                Err(_) => break,
            }
        }
        set
    }

    /// Stop accepting signals and release everything still queued.
    pub fn close(&self) -> usize {
        self.queue.close();
        let mut released = 0;
        while let Ok(mut token) = self.queue.pop() {
            token.release();
            released += 1;
        }
        released
    }
}

impl ReadyQueue for SignalQueue {
    fn ready(&self, _timeout: Option<Duration>) -> Result<ReadySet> {
        Ok(self.drain_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::TaskId;
    use async_task::Runnable;
    use std::sync::{Arc, Mutex};

    fn recording_token(id: u64, log: Arc<Mutex<Vec<u64>>>) -> Continuation {
        let (runnable, task) = async_task::Builder::new().metadata(TaskId(id)).spawn(
            move |_| async move {
                log.lock().unwrap().push(id);
            },
            |_r: Runnable<TaskId>| {},
        );
        task.detach();
        Continuation::new(runnable)
    }

    #[test]
    fn signals_come_back_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = SignalQueue::new(16);
        for id in [4, 1, 9] {
            queue.signal(recording_token(id, log.clone())).unwrap();
        }

        let set = queue.ready(Some(Duration::ZERO)).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.resume_all(), 3);
        assert_eq!(*log.lock().unwrap(), vec![4, 1, 9]);
        assert!(queue.is_empty());
    }

    #[test]
    fn batches_are_capped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = SignalQueue::new(2);
        for id in 0..5 {
            queue.signal(recording_token(id, log.clone())).unwrap();
        }
        assert_eq!(queue.drain_batch().len(), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn empty_queue_yields_empty_set() {
        let queue = SignalQueue::new(8);
        let set = queue.ready(None).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn close_releases_and_rejects() {
        let queue = SignalQueue::new(8);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.signal(recording_token(1, log.clone())).unwrap();
        assert_eq!(queue.close(), 1);
        assert!(queue.signal(recording_token(2, log.clone())).is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
