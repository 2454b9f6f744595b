//! Single-slot signal gating suspended waiters.
//!
//! Waiters are kept in registration order. Under [`Reset::Auto`] a signal
//! wakes the front waiter only, and whichever waiter consumes it clears the
//! slot; everyone behind it stays suspended. Under [`Reset::Manual`] a signal
//! wakes every waiter and stays set until [`Event::reset`].
//!
//! Consumption happens when the woken computation is resumed and polls its
//! [`Wait`] future, not when `set` runs. A front waiter that is cancelled
//! before it runs passes the signal on to the next one.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use strand_rt::{Error, Result};

use crate::guard::{Guard, Locked};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reset {
    /// Cleared by the waiter that consumes the signal.
    Auto,
    /// Stays set until explicitly reset.
    Manual,
}

struct State {
    signaled: bool,
    reset: Reset,
    waiters: VecDeque<(u64, Waker)>,
    next_waiter: u64,
    closed: bool,
}

impl State {
    fn position(&self, id: u64) -> Option<usize> {
        self.waiters.iter().position(|(w, _)| *w == id)
    }

    fn remove(&mut self, id: u64) {
        if let Some(at) = self.position(id) {
            self.waiters.remove(at);
        }
    }

    fn front_waker(&self) -> Option<Waker> {
        self.waiters.front().map(|(_, waker)| waker.clone())
    }
}

struct Inner<G: Guard> {
    state: G::Cell<State>,
}

impl<G: Guard> Inner<G> {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        G::with(&self.state, f)
    }
}

/// Auto or manual reset event.
///
/// ```
/// use strand_rt::Driver;
/// use strand_sync::Event;
///
/// let driver = Driver::new()?;
/// let event: Event = Event::manual();
/// event.set();
/// driver.block_on(event.wait())??;
/// assert!(event.is_set());
/// # Ok::<(), strand_rt::Error>(())
/// ```
pub struct Event<G: Guard = Locked> {
    inner: Arc<Inner<G>>,
}

impl<G: Guard> Event<G> {
    pub fn new(reset: Reset) -> Self {
        let state = State {
            signaled: false,
            reset,
            waiters: VecDeque::new(),
            next_waiter: 0,
            closed: false,
        };
        Self {
            inner: Arc::new(Inner {
                state: G::new(state),
            }),
        }
    }

    pub fn auto() -> Self {
        Self::new(Reset::Auto)
    }

    pub fn manual() -> Self {
        Self::new(Reset::Manual)
    }

    pub fn reset_policy(&self) -> Reset {
        self.inner.with(|s| s.reset)
    }

    /// Signal the event. Setting an already set event has no further effect.
    pub fn set(&self) {
        let wake: Vec<Waker> = self.inner.with(|s| {
            if s.signaled {
                return Vec::new();
            }
            s.signaled = true;
            match s.reset {
                Reset::Auto => s.front_waker().into_iter().collect(),
                Reset::Manual => s.waiters.iter().map(|(_, w)| w.clone()).collect(),
            }
        });
        wake.into_iter().for_each(Waker::wake);
    }

    /// Clear the signal.
    pub fn reset(&self) {
        self.inner.with(|s| s.signaled = false);
    }

    pub fn is_set(&self) -> bool {
        self.inner.with(|s| s.signaled)
    }

    /// Number of currently suspended waiters.
    pub fn waiters(&self) -> usize {
        self.inner.with(|s| s.waiters.len())
    }

    /// Wait for the signal. Resolves with [`Error::Closed`] if the event is
    /// dropped first.
    pub fn wait(&self) -> Wait<G> {
        Wait {
            inner: self.inner.clone(),
            id: None,
        }
    }
}

impl<G: Guard> Default for Event<G> {
    fn default() -> Self {
        Self::auto()
    }
}

impl<G: Guard> Drop for Event<G> {
    fn drop(&mut self) {
        let wake: Vec<Waker> = self.inner.with(|s| {
            s.closed = true;
            s.waiters.iter().map(|(_, w)| w.clone()).collect()
        });
        if !wake.is_empty() {
            tracing::debug!(waiters = wake.len(), "event dropped with suspended waiters");
        }
        wake.into_iter().for_each(Waker::wake);
    }
}

impl<G: Guard> fmt::Debug for Event<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.with(|s| {
            f.debug_struct("Event")
                .field("reset", &s.reset)
                .field("signaled", &s.signaled)
                .field("waiters", &s.waiters.len())
                .finish()
        })
    }
}

/// Future returned by [`Event::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<G: Guard = Locked> {
    inner: Arc<Inner<G>>,
    id: Option<u64>,
}

impl<G: Guard> Future for Wait<G> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        let id = this.id;
        let (poll, registered) = this.inner.with(|s| {
            if s.closed {
                if let Some(id) = id {
                    s.remove(id);
                }
                return (Poll::Ready(Err(Error::Closed("event"))), None);
            }

            let may_consume = match (s.reset, id) {
                (Reset::Manual, _) => true,
                (Reset::Auto, Some(id)) => s.waiters.front().is_some_and(|(w, _)| *w == id),
                (Reset::Auto, None) => s.waiters.is_empty(),
            };
            if s.signaled && may_consume {
                if s.reset == Reset::Auto {
                    s.signaled = false;
                }
                if let Some(id) = id {
                    s.remove(id);
                }
                return (Poll::Ready(Ok(())), None);
            }

            match id.and_then(|id| s.position(id)) {
                Some(at) => {
                    let slot = &mut s.waiters[at].1;
                    if !slot.will_wake(cx.waker()) {
                        *slot = cx.waker().clone();
                    }
                    (Poll::Pending, id)
                }
                None => {
                    let id = s.next_waiter;
                    s.next_waiter += 1;
                    s.waiters.push_back((id, cx.waker().clone()));
                    (Poll::Pending, Some(id))
                }
            }
        });
        this.id = registered;
        poll
    }
}

impl<G: Guard> Drop for Wait<G> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        // A cancelled front waiter hands a pending auto signal to the next one.
        let next = self.inner.with(|s| {
            let was_front = s.waiters.front().is_some_and(|(w, _)| *w == id);
            s.remove(id);
            if was_front && s.signaled && s.reset == Reset::Auto {
                s.front_waker()
            } else {
                None
            }
        });
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;
    use futures::FutureExt;

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let waker = noop_waker();
        Pin::new(fut).poll(&mut Context::from_waker(&waker))
    }

    #[test]
    fn set_is_idempotent() {
        let event = Event::<Locked>::auto();
        event.set();
        event.set();
        assert!(event.is_set());
        assert!(matches!(event.wait().now_or_never(), Some(Ok(()))));
        // Two sets before consumption collapse to one signal.
        assert!(!event.is_set());
        assert!(event.wait().now_or_never().is_none());
    }

    #[test]
    fn auto_reset_releases_one_waiter_per_signal() {
        let event = Event::<Locked>::auto();
        let mut a = event.wait();
        let mut b = event.wait();
        assert!(poll_once(&mut a).is_pending());
        assert!(poll_once(&mut b).is_pending());
        assert_eq!(event.waiters(), 2);

        event.set();
        // b is not at the front, so it re-suspends.
        assert!(poll_once(&mut b).is_pending());
        assert!(matches!(poll_once(&mut a), Poll::Ready(Ok(()))));
        assert!(!event.is_set());
        assert!(poll_once(&mut b).is_pending());

        event.set();
        assert!(matches!(poll_once(&mut b), Poll::Ready(Ok(()))));
        assert_eq!(event.waiters(), 0);
    }

    #[test]
    fn manual_reset_releases_everyone_until_reset() {
        let event = Event::<Locked>::manual();
        let mut a = event.wait();
        let mut b = event.wait();
        assert!(poll_once(&mut a).is_pending());
        assert!(poll_once(&mut b).is_pending());

        event.set();
        assert!(matches!(poll_once(&mut b), Poll::Ready(Ok(()))));
        assert!(matches!(poll_once(&mut a), Poll::Ready(Ok(()))));
        assert!(matches!(event.wait().now_or_never(), Some(Ok(()))));
        assert!(event.is_set());

        event.reset();
        assert!(!event.is_set());
        assert!(event.wait().now_or_never().is_none());
    }

    #[test]
    fn manual_set_resumes_tasks_in_registration_order() {
        use std::sync::Mutex;
        use strand_rt::Driver;

        let driver = Driver::new().unwrap();
        let event = Arc::new(Event::<Locked>::manual());
        let order = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<_> = (0..4)
            .map(|n| {
                let wait = event.wait();
                let order = order.clone();
                driver.spawn(async move {
                    wait.await?;
                    order.lock().unwrap().push(n);
                    Ok::<(), Error>(())
                })
            })
            .collect();

        driver.run_until_idle().unwrap();
        assert_eq!(event.waiters(), 4);
        assert!(order.lock().unwrap().is_empty());

        event.set();
        driver.run_until_idle().unwrap();
        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
        assert_eq!(event.waiters(), 0);
        for task in tasks {
            driver.block_on(task).unwrap().unwrap();
        }
    }

    #[test]
    fn cancelled_front_waiter_passes_signal_on() {
        let event = Event::<Locked>::auto();
        let mut a = event.wait();
        let mut b = event.wait();
        assert!(poll_once(&mut a).is_pending());
        assert!(poll_once(&mut b).is_pending());

        event.set();
        drop(a);
        assert!(matches!(poll_once(&mut b), Poll::Ready(Ok(()))));
    }

    #[test]
    fn new_arrival_queues_behind_existing_waiters() {
        let event = Event::<Locked>::auto();
        let mut first = event.wait();
        assert!(poll_once(&mut first).is_pending());
        event.set();

        let mut late = event.wait();
        assert!(poll_once(&mut late).is_pending());
        assert!(matches!(poll_once(&mut first), Poll::Ready(Ok(()))));
    }

    #[test]
    fn dropping_event_fails_suspended_waiters() {
        let event = Event::<Locked>::manual();
        let mut wait = event.wait();
        assert!(poll_once(&mut wait).is_pending());
        drop(event);
        assert!(matches!(
            poll_once(&mut wait),
            Poll::Ready(Err(Error::Closed("event")))
        ));
    }

    #[test]
    fn set_wakes_the_registered_waker() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::task::Wake;

        struct Flag(AtomicBool);
        impl Wake for Flag {
            fn wake(self: Arc<Self>) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let waker = Waker::from(flag.clone());
        let event = Event::<Locked>::auto();
        let mut wait = event.wait();
        assert!(Pin::new(&mut wait)
            .poll(&mut Context::from_waker(&waker))
            .is_pending());
        assert!(!flag.0.load(Ordering::SeqCst));
        event.set();
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
