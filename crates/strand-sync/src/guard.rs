//! Interior-mutability strategies for primitive state.
//!
//! [`Locked`] wraps state in a mutex so the primitive can be shared across
//! threads. [`Unlocked`] uses a `RefCell` for primitives that live entirely
//! under one cooperative scheduler; such primitives are `!Sync`.
//!
//! Primitives never wake wakers while inside `with`, and every mutation
//! they make there is panic-free, so a poisoned mutex still guards
//! consistent state and is simply recovered.

use std::cell::RefCell;
use std::sync::{Mutex, PoisonError};

pub trait Guard: 'static {
    type Cell<S>;

    fn new<S>(state: S) -> Self::Cell<S>;

    fn with<S, R>(cell: &Self::Cell<S>, f: impl FnOnce(&mut S) -> R) -> R;
}

/// Mutex-guarded state, for cross-thread use.
#[derive(Debug)]
pub enum Locked {}

impl Guard for Locked {
    type Cell<S> = Mutex<S>;

    fn new<S>(state: S) -> Self::Cell<S> {
        Mutex::new(state)
    }

    fn with<S, R>(cell: &Self::Cell<S>, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = cell.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Unguarded state, for single-scheduler cooperative use.
#[derive(Debug)]
pub enum Unlocked {}

impl Guard for Unlocked {
    type Cell<S> = RefCell<S>;

    fn new<S>(state: S) -> Self::Cell<S> {
        RefCell::new(state)
    }

    fn with<S, R>(cell: &Self::Cell<S>, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut cell.borrow_mut())
    }
}
