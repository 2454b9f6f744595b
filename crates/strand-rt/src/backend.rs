//! Event-poller backends.
//!
//! Every OS poller sits behind [`Backend`]. The reactor only talks to this
//! trait, so no primitive ever branches on platform. [`PollingBackend`] covers
//! epoll, kqueue and IOCP through the `polling` crate.

use std::sync::Mutex;
use std::time::Duration;

use polling::{Event, Events, Poller};

use crate::error::{Error, Result};

#[cfg(unix)]
pub type RawSource = std::os::fd::RawFd;
#[cfg(windows)]
pub type RawSource = std::os::windows::io::RawSocket;

/// Readiness directions a source wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// One readiness report from a backend wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub key: usize,
    pub readable: bool,
    pub writable: bool,
}

/// Capability interface implemented by each OS poller.
///
/// Interest is oneshot: after a source is reported it must be re-armed with
/// [`change`](Self::change) before it is reported again.
pub trait Backend: Send + Sync {
    /// Start watching `source` under `key`.
    fn add(&self, source: RawSource, key: usize, interest: Interest) -> Result<()>;

    /// Replace (and re-arm) the interest of a watched source.
    fn change(&self, source: RawSource, key: usize, interest: Interest) -> Result<()>;

    /// Stop watching `source`.
    fn remove(&self, source: RawSource) -> Result<()>;

    /// Block up to `timeout` and append readiness reports to `out`.
    fn wait(&self, timeout: Option<Duration>, out: &mut Vec<Readiness>) -> Result<usize>;

    /// Interrupt a concurrent or the next `wait`.
    fn notify(&self) -> Result<()>;
}

/// Backend over the OS poller picked by the `polling` crate.
pub struct PollingBackend {
    poller: Poller,
    events: Mutex<Events>,
}

impl PollingBackend {
    pub fn new() -> Result<Self> {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let poller = Poller::new().map_err(|e| Error::os("poller create", e))?;
        let events = match std::num::NonZeroUsize::new(capacity) {
            Some(cap) => Events::with_capacity(cap),
            None => Events::new(),
        };
        Ok(Self {
            poller,
            events: Mutex::new(events),
        })
    }
}

fn to_event(key: usize, interest: Interest) -> Event {
    Event::new(key, interest.readable, interest.writable)
}

impl Backend for PollingBackend {
    fn add(&self, source: RawSource, key: usize, interest: Interest) -> Result<()> {
        // SAFETY: the reactor removes every source before its owner closes it.
        unsafe { self.poller.add(source, to_event(key, interest)) }
            .map_err(|e| Error::os("poller add", e))
    }

    fn change(&self, source: RawSource, key: usize, interest: Interest) -> Result<()> {
        self.poller
            .modify(borrow(source), to_event(key, interest))
            .map_err(|e| Error::os("poller change", e))
    }

    fn remove(&self, source: RawSource) -> Result<()> {
        self.poller
            .delete(borrow(source))
            .map_err(|e| Error::os("poller remove", e))
    }

    fn wait(&self, timeout: Option<Duration>, out: &mut Vec<Readiness>) -> Result<usize> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        events.clear();
        self.poller
            .wait(&mut events, timeout)
            .map_err(|e| Error::os("poller wait", e))?;
        let before = out.len();
        out.extend(events.iter().map(|ev| Readiness {
            key: ev.key,
            readable: ev.readable,
            writable: ev.writable,
        }));
        Ok(out.len() - before)
    }

    fn notify(&self) -> Result<()> {
        self.poller
            .notify()
            .map_err(|e| Error::os("poller notify", e))
    }
}

#[cfg(unix)]
fn borrow<'a>(source: RawSource) -> std::os::fd::BorrowedFd<'a> {
    // SAFETY: sources stay open while registered with the reactor.
    unsafe { std::os::fd::BorrowedFd::borrow_raw(source) }
}

#[cfg(windows)]
fn borrow<'a>(source: RawSource) -> std::os::windows::io::BorrowedSocket<'a> {
    // SAFETY: sources stay open while registered with the reactor.
    unsafe { std::os::windows::io::BorrowedSocket::borrow_raw(source) }
}
