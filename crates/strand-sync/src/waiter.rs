//! Hand-off slots between a primitive and one suspended computation.
//!
//! A registration produces two halves. The primitive keeps the move-only
//! [`Waiter`] in its wait queue; the suspended future keeps [`WaitFor`].
//! The slot moves through these states:
//!
//! ```text
//!   Suspended --resume(v)--> Resumed(v) --poll--> Done
//!       |
//!       +--release / drop Waiter--> Destroyed --poll--> Done
//!       |
//!       +--drop WaitFor--> Abandoned   (resume hands the value back)
//! ```

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

enum Slot<T> {
    Suspended(Waker),
    Resumed(T),
    Destroyed,
    Abandoned,
    Done,
}

type SharedSlot<T> = Arc<Mutex<Slot<T>>>;

fn lock<T>(slot: &SharedSlot<T>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register interest: returns the primitive's half and the future's half.
pub(crate) fn register<T>(waker: &Waker) -> (Waiter<T>, WaitFor<T>) {
    let slot = Arc::new(Mutex::new(Slot::Suspended(waker.clone())));
    (
        Waiter {
            slot: Some(slot.clone()),
        },
        WaitFor { slot },
    )
}

/// The primitive's half. Resolving it wakes the suspended computation, which
/// then runs when its continuation comes out of the ready queue.
pub(crate) struct Waiter<T> {
    slot: Option<SharedSlot<T>>,
}

impl<T> Waiter<T> {
    /// Hand `value` to the suspended side. Gives the value back if that side
    /// already went away.
    pub(crate) fn resume(mut self, value: T) -> Result<(), T> {
        let Some(slot) = self.slot.take() else {
            return Err(value);
        };
        let waker = {
            let mut state = lock(&slot);
            match mem::replace(&mut *state, Slot::Done) {
                Slot::Suspended(waker) => {
                    *state = Slot::Resumed(value);
                    waker
                }
                other => {
                    *state = other;
                    return Err(value);
                }
            }
        };
        waker.wake();
        Ok(())
    }

    /// Resolve the suspended side with failure. Idempotent.
    pub(crate) fn release(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let waker = {
            let mut state = lock(&slot);
            match mem::replace(&mut *state, Slot::Done) {
                Slot::Suspended(waker) => {
                    *state = Slot::Destroyed;
                    Some(waker)
                }
                other => {
                    *state = other;
                    None
                }
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        match &self.slot {
            Some(slot) => matches!(*lock(slot), Slot::Abandoned),
            None => true,
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The suspended future's half. Resolves to `Some(value)` when resumed and
/// `None` when the primitive released it.
pub(crate) struct WaitFor<T> {
    slot: SharedSlot<T>,
}

impl<T> WaitFor<T> {
    /// Take a value that was resumed but never observed by a poll.
    pub(crate) fn into_resumed(self) -> Option<T> {
        let mut state = lock(&self.slot);
        match mem::replace(&mut *state, Slot::Done) {
            Slot::Resumed(value) => Some(value),
            other => {
                *state = other;
                None
            }
        }
    }
}

impl<T> Future for WaitFor<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = lock(&self.slot);
        match mem::replace(&mut *state, Slot::Done) {
            Slot::Resumed(value) => Poll::Ready(Some(value)),
            Slot::Destroyed | Slot::Done | Slot::Abandoned => Poll::Ready(None),
            Slot::Suspended(waker) => {
                let waker = if waker.will_wake(cx.waker()) {
                    waker
                } else {
                    cx.waker().clone()
                };
                *state = Slot::Suspended(waker);
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for WaitFor<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.slot);
        if matches!(*state, Slot::Suspended(_)) {
            *state = Slot::Abandoned;
        }
    }
}
