//! Countdown gate for OS threads.
//!
//! Unlike the other primitives a latch blocks the calling thread (mutex and
//! condition variable). Use it for fork/join across worker threads, not
//! inside a cooperative task.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use strand_rt::{Error, Result};

#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Raise the counter by `n`.
    pub fn add(&self, n: usize) -> Result<()> {
        let mut count = self.lock();
        *count = count
            .checked_add(n)
            .ok_or_else(|| Error::usage(format!("latch counter overflow adding {n}")))?;
        Ok(())
    }

    pub fn count_down(&self) -> Result<()> {
        self.count_down_by(1)
    }

    /// Lower the counter by `n`. Fails without changing the counter if `n`
    /// exceeds it.
    pub fn count_down_by(&self, n: usize) -> Result<()> {
        let mut count = self.lock();
        if n > *count {
            return Err(Error::usage(format!(
                "latch count_down({n}) exceeds remaining count {}",
                *count
            )));
        }
        *count -= n;
        if *count == 0 {
            self.zero.notify_all();
        }
        Ok(())
    }

    pub fn count_down_and_wait(&self) -> Result<()> {
        self.count_down()?;
        self.wait();
        Ok(())
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        let count = self.lock();
        let _count = self
            .zero
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the counter reaches zero or `timeout` elapses. Returns
    /// `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .zero
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn try_wait(&self) -> bool {
        *self.lock() == 0
    }
}
