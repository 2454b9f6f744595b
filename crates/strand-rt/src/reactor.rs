use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use slab::Slab;

use crate::backend::{Backend, Interest, RawSource, Readiness};
use crate::error::{Error, Result};

/// An IO source registered with the reactor.
struct Source {
    raw: RawSource,
    /// Whether the backend has been told about this source yet.
    registered: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    /// Set by react() when the backend reports readable; cleared by poll_readable.
    read_ready: bool,
    /// Set by react() when the backend reports writable; cleared by poll_writable.
    write_ready: bool,
}

/// BTreeMap for ordered expiry, HashMap for id -> deadline lookup.
#[derive(Default)]
struct TimerState {
    heap: BTreeMap<(Instant, u64), Option<Waker>>,
    deadlines: HashMap<u64, Instant>,
}

/// Turns backend readiness and expired deadlines into wakeups.
///
/// The reactor never runs a computation. It only wakes wakers, and the
/// wakers push continuations onto the driver's signal queue.
pub(crate) struct Reactor {
    backend: Box<dyn Backend>,
    sources: Mutex<Slab<Source>>,
    timers: Mutex<TimerState>,
    timer_id: AtomicU64,
    readiness: Mutex<Vec<Readiness>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Reactor {
    pub(crate) fn new(backend: Box<dyn Backend>, event_capacity: usize) -> Self {
        Self {
            backend,
            sources: Mutex::new(Slab::new()),
            timers: Mutex::new(TimerState::default()),
            timer_id: AtomicU64::new(0),
            readiness: Mutex::new(Vec::with_capacity(event_capacity)),
        }
    }

    pub(crate) fn notify(&self) -> Result<()> {
        self.backend.notify()
    }

    /// Drop every stored waker without waking it.
    pub(crate) fn shutdown(&self) {
        // Dropping a waker can drop a task whose future touches the reactor,
        // so nothing is dropped while a lock is held.
        let mut released: Vec<Waker> = {
            let mut state = lock(&self.timers);
            state.deadlines.clear();
            std::mem::take(&mut state.heap).into_values().flatten().collect()
        };
        for (_, source) in lock(&self.sources).iter_mut() {
            released.extend(source.read_waker.take());
            released.extend(source.write_waker.take());
        }
        drop(released);
    }

    // ── IO ──────────────────────────────────────────────────────────

    /// Track a source. The backend is not told until the first poll.
    pub(crate) fn io_register(&self, raw: RawSource) -> usize {
        let mut sources = lock(&self.sources);
        sources.insert(Source {
            raw,
            registered: false,
            read_waker: None,
            write_waker: None,
            read_ready: false,
            write_ready: false,
        })
    }

    /// Forget a source, removing it from the backend if it was added.
    pub(crate) fn io_deregister(&self, key: usize) -> Result<()> {
        let source = {
            let mut sources = lock(&self.sources);
            match sources.try_remove(key) {
                Some(source) => source,
                None => return Ok(()),
            }
        };
        if source.registered {
            self.backend.remove(source.raw)?;
        }
        Ok(())
    }

    pub(crate) fn io_poll_readable(&self, key: usize, waker: &Waker) -> Result<Poll<()>> {
        self.io_poll(key, waker, true)
    }

    pub(crate) fn io_poll_writable(&self, key: usize, waker: &Waker) -> Result<Poll<()>> {
        self.io_poll(key, waker, false)
    }

    fn io_poll(&self, key: usize, waker: &Waker, read: bool) -> Result<Poll<()>> {
        let mut sources = lock(&self.sources);
        let source = sources
            .get_mut(key)
            .ok_or_else(|| Error::usage(format!("io source {key} is not registered")))?;

        let (ready, slot) = if read {
            (&mut source.read_ready, &mut source.read_waker)
        } else {
            (&mut source.write_ready, &mut source.write_waker)
        };
        if *ready {
            *ready = false;
            return Ok(Poll::Ready(()));
        }
        if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
            *slot = Some(waker.clone());
        }
        self.update_interest(key, source)?;
        Ok(Poll::Pending)
    }

    /// Sync backend interest with current waker state.
    fn update_interest(&self, key: usize, source: &mut Source) -> Result<()> {
        let interest = Interest {
            readable: source.read_waker.is_some(),
            writable: source.write_waker.is_some(),
        };
        if source.registered {
            self.backend.change(source.raw, key, interest)
        } else {
            self.backend.add(source.raw, key, interest)?;
            source.registered = true;
            Ok(())
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    pub(crate) fn timer_create(&self, deadline: Instant) -> u64 {
        let id = self.timer_id.fetch_add(1, Ordering::Relaxed);
        let mut state = lock(&self.timers);
        state.deadlines.insert(id, deadline);
        state.heap.insert((deadline, id), None);
        id
    }

    /// Cancel a pending timer. Its waker is dropped, not woken.
    pub(crate) fn timer_cancel(&self, id: u64) {
        let mut state = lock(&self.timers);
        if let Some(deadline) = state.deadlines.remove(&id) {
            state.heap.remove(&(deadline, id));
        }
    }

    pub(crate) fn timer_poll(&self, id: u64, waker: &Waker) -> Poll<()> {
        let mut state = lock(&self.timers);
        let deadline = match state.deadlines.get(&id) {
            Some(&d) => d,
            None => return Poll::Ready(()),
        };
        if Instant::now() >= deadline {
            state.deadlines.remove(&id);
            state.heap.remove(&(deadline, id));
            return Poll::Ready(());
        }
        state.heap.insert((deadline, id), Some(waker.clone()));
        Poll::Pending
    }

    /// Time until the earliest armed timer, if any.
    pub(crate) fn next_timer(&self) -> Option<Duration> {
        let state = lock(&self.timers);
        state
            .heap
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    // ── React ───────────────────────────────────────────────────────

    /// Fire expired timers, wait on the backend, wake whatever became ready.
    /// Returns the number of wakers fired.
    pub(crate) fn react(&self, timeout: Option<Duration>) -> Result<usize> {
        let mut wakers = Vec::new();

        {
            let now = Instant::now();
            let mut state = lock(&self.timers);
            while let Some((deadline, id)) = state.heap.keys().next().copied() {
                if deadline > now {
                    break;
                }
                if let Some(Some(waker)) = state.heap.remove(&(deadline, id)) {
                    wakers.push(waker);
                }
                state.deadlines.remove(&id);
            }
        }
        let next_timer = self.next_timer();

        // Don't sleep if a timer already fired; min(caller, next timer) otherwise.
        let effective_timeout = if !wakers.is_empty() {
            Some(Duration::ZERO)
        } else {
            match (timeout, next_timer) {
                (None, None) => None,
                (Some(t), None) | (None, Some(t)) => Some(t),
                (Some(a), Some(b)) => Some(a.min(b)),
            }
        };

        let reported = {
            let mut readiness = lock(&self.readiness);
            readiness.clear();
            self.backend.wait(effective_timeout, &mut readiness)?;
            std::mem::take(&mut *readiness)
        };

        {
            let mut sources = lock(&self.sources);
            for ev in &reported {
                if let Some(source) = sources.get_mut(ev.key) {
                    if ev.readable {
                        source.read_ready = true;
                        if let Some(waker) = source.read_waker.take() {
                            wakers.push(waker);
                        }
                    }
                    if ev.writable {
                        source.write_ready = true;
                        if let Some(waker) = source.write_waker.take() {
                            wakers.push(waker);
                        }
                    }
                }
            }
        }
        *lock(&self.readiness) = reported;

        let fired = wakers.len();
        if fired > 0 {
            tracing::trace!(fired, "reactor woke tasks");
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(fired)
    }
}
