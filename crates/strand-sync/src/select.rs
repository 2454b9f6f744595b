//! Non-suspending multi-channel poll.
//!
//! [`Select`] scans its arms once, left to right, and fires the callback of
//! the first channel that already has data. If none has data it returns
//! `None` without firing anything and without registering any waiter. It is
//! biased toward earlier arms by construction; it is not a fair multiplexer.

use crate::channel::Channel;
use crate::guard::Guard;

type Arm<'a> = Box<dyn FnMut() -> bool + 'a>;

/// One-shot poll over channels of possibly different element types.
///
/// ```
/// use std::cell::RefCell;
/// use strand_sync::{Channel, Select};
///
/// let numbers = Channel::<u32>::new(1);
/// let words = Channel::<&str>::new(1);
/// words.try_write("hi").unwrap();
///
/// let seen = RefCell::new(None);
/// let fired = Select::new()
///     .recv(&numbers, |n| *seen.borrow_mut() = Some(n.to_string()))
///     .recv(&words, |w| *seen.borrow_mut() = Some(w.to_owned()))
///     .poll();
/// assert_eq!(fired, Some(1));
/// assert_eq!(seen.into_inner().as_deref(), Some("hi"));
/// ```
#[derive(Default)]
pub struct Select<'a> {
    arms: Vec<Arm<'a>>,
}

impl<'a> Select<'a> {
    pub fn new() -> Self {
        Self { arms: Vec::new() }
    }

    /// Add an arm: if `channel` has data when polled, `callback` gets the value.
    pub fn recv<T, G, F>(mut self, channel: &'a Channel<T, G>, callback: F) -> Self
    where
        G: Guard,
        F: FnOnce(T) + 'a,
    {
        let mut callback = Some(callback);
        self.arms.push(Box::new(move || match channel.try_read() {
            Some(value) => {
                if let Some(callback) = callback.take() {
                    callback(value);
                }
                true
            }
            None => false,
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Run the scan. Returns the index of the arm that fired, if any.
    pub fn poll(mut self) -> Option<usize> {
        self.arms.iter_mut().position(|arm| arm())
    }
}

/// Sugar over [`Select`]: `select!(ch_a => |v| ..., ch_b => |v| ...)`.
///
/// Evaluates to the index of the arm that fired, or `None`.
#[macro_export]
macro_rules! select {
    ($($channel:expr => $callback:expr),+ $(,)?) => {
        $crate::Select::new()
            $(.recv(&$channel, $callback))+
            .poll()
    };
}
