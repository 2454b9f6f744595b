//! Bounded rendezvous channel with suspending reads and writes.
//!
//! A write suspends only while the buffer is full and no reader is waiting
//! to take the value directly; a read suspends only while the buffer is
//! empty and no writer is waiting. With capacity 0 every transfer is a
//! direct hand-off between one reader and one writer.
//!
//! Closing (or dropping) a channel resolves every suspended reader with
//! `None` and every suspended writer with [`Error::Closed`]. Buffered values
//! can still be read after close.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use strand_rt::{Error, Result};

use crate::guard::{Guard, Locked};
use crate::waiter::{self, WaitFor, Waiter};

struct State<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    readers: VecDeque<Waiter<T>>,
    writers: VecDeque<(Waiter<()>, T)>,
    /// Values of cancelled writers, dropped once the guard is released.
    stale: Vec<T>,
    closed: bool,
}

impl<T> State<T> {
    /// Non-suspending take: buffered values first, then a waiting writer.
    /// Also returns the writer that must be resumed once the guard is released.
    fn take(&mut self) -> Option<(T, Option<Waiter<()>>)> {
        if let Some(value) = self.buffer.pop_front() {
            let refill = self.pop_writer().map(|(writer, pending)| {
                self.buffer.push_back(pending);
                writer
            });
            return Some((value, refill));
        }
        self.pop_writer().map(|(writer, value)| (value, Some(writer)))
    }

    fn pop_writer(&mut self) -> Option<(Waiter<()>, T)> {
        while let Some((writer, value)) = self.writers.pop_front() {
            if !writer.is_abandoned() {
                return Some((writer, value));
            }
            self.stale.push(value);
        }
        None
    }

    fn pop_reader(&mut self) -> Option<Waiter<T>> {
        while let Some(reader) = self.readers.pop_front() {
            if !reader.is_abandoned() {
                return Some(reader);
            }
        }
        None
    }
}

struct Core<T, G: Guard> {
    state: G::Cell<State<T>>,
}

impl<T, G: Guard> Core<T, G> {
    /// Run `f` under the guard. Values it discarded are dropped afterwards,
    /// so their destructors may use the channel again.
    fn with<R>(&self, f: impl FnOnce(&mut State<T>) -> R) -> R {
        let (out, stale) = G::with(&self.state, |s| {
            let out = f(s);
            (out, std::mem::take(&mut s.stale))
        });
        drop(stale);
        out
    }

    /// Put back a value that was handed to a reader which went away before
    /// taking it: to the next waiting reader, else to the front of the
    /// buffer if it has room. Returns the value if neither is possible.
    fn requeue(&self, value: T) -> Option<T> {
        let mut value = value;
        loop {
            let step = self.with(|s| match s.pop_reader() {
                Some(reader) => Ok((reader, value)),
                None if s.buffer.len() < s.capacity => {
                    s.buffer.push_front(value);
                    Err(None)
                }
                None => Err(Some(value)),
            });
            match step {
                Ok((reader, v)) => match reader.resume(v) {
                    Ok(()) => return None,
                    Err(v) => value = v,
                },
                Err(rest) => return rest,
            }
        }
    }

    fn try_read(&self) -> Option<T> {
        let (value, writer) = self.with(State::take)?;
        if let Some(writer) = writer {
            let _ = writer.resume(());
        }
        Some(value)
    }

    /// Mark closed and release every suspended waiter. Returns
    /// `(readers, writers)` released.
    fn close(&self) -> (usize, usize) {
        let (readers, writers) = self.with(|s| {
            s.closed = true;
            (std::mem::take(&mut s.readers), std::mem::take(&mut s.writers))
        });
        let counts = (readers.len(), writers.len());
        // Dropping the waiters resolves them with failure.
        drop(readers);
        drop(writers);
        counts
    }
}

/// Error from [`Channel::try_write`]. Carries the value back.
#[derive(PartialEq, Eq)]
pub enum TryWriteError<T> {
    Full(T),
    Closed(T),
}

impl<T> TryWriteError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryWriteError::Full(v) | TryWriteError::Closed(v) => v,
        }
    }
}

impl<T> fmt::Debug for TryWriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryWriteError::Full(_) => f.write_str("Full(..)"),
            TryWriteError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// A typed, capacity-bounded channel.
///
/// `Channel<T>` (mutex guarded) may be shared across threads through an
/// `Arc`. `Channel<T, Unlocked>` skips the mutex and must stay under one
/// cooperative scheduler.
///
/// Futures returned by [`read`](Self::read) and [`write`](Self::write) do not
/// borrow the channel, so the owner can drop it while they are suspended.
pub struct Channel<T, G: Guard = Locked> {
    core: Arc<Core<T, G>>,
}

impl<T, G: Guard> Channel<T, G> {
    pub fn new(capacity: usize) -> Self {
        let state = State {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            readers: VecDeque::new(),
            writers: VecDeque::new(),
            stale: Vec::new(),
            closed: false,
        };
        Self {
            core: Arc::new(Core {
                state: G::new(state),
            }),
        }
    }

    /// A capacity-0 channel: every write meets a read.
    pub fn rendezvous() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.core.with(|s| s.capacity)
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.core.with(|s| s.buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.core.with(|s| s.closed)
    }

    /// True if a read would complete without suspending.
    pub fn has_data(&self) -> bool {
        self.core
            .with(|s| !s.buffer.is_empty() || s.writers.iter().any(|(w, _)| !w.is_abandoned()))
    }

    /// Read the next value, suspending while none is available.
    ///
    /// Resolves to `Some(value)`, or `None` once the channel is closed and
    /// drained.
    ///
    /// A writer may hand its value straight to a suspended read. If the read
    /// is dropped before it runs again, that value goes to the next waiting
    /// reader or back to the front of the buffer. With no waiting reader and
    /// no free buffer slot (always the case for a rendezvous channel) the
    /// value is dropped, even though the writer already completed.
    pub fn read(&self) -> Read<T, G> {
        Read {
            core: self.core.clone(),
            wait: None,
            done: false,
        }
    }

    /// Like [`read`](Self::read) but reports `(value, ok)`, with
    /// `(T::default(), false)` for a closed and drained channel.
    pub fn read_or_default(&self) -> impl Future<Output = (T, bool)>
    where
        T: Default,
    {
        let read = self.read();
        async move {
            match read.await {
                Some(value) => (value, true),
                None => (T::default(), false),
            }
        }
    }

    /// Write a value, suspending while the buffer is full and no reader waits.
    pub fn write(&self, value: T) -> Write<T, G> {
        Write {
            core: self.core.clone(),
            value: Some(value),
            wait: None,
        }
    }

    /// Take a value if one is available right now.
    pub fn try_read(&self) -> Option<T> {
        self.core.try_read()
    }

    /// Deliver a value if that is possible without suspending.
    pub fn try_write(&self, value: T) -> std::result::Result<(), TryWriteError<T>> {
        let mut value = value;
        loop {
            let step = self.core.with(|s| {
                if s.closed {
                    return Err(TryWriteError::Closed(value));
                }
                if let Some(reader) = s.pop_reader() {
                    return Ok(Some((reader, value)));
                }
                if s.buffer.len() < s.capacity {
                    s.buffer.push_back(value);
                    return Ok(None);
                }
                Err(TryWriteError::Full(value))
            })?;
            match step {
                None => return Ok(()),
                Some((reader, v)) => match reader.resume(v) {
                    Ok(()) => return Ok(()),
                    Err(v) => value = v,
                },
            }
        }
    }

    /// Stop accepting writes. Suspended readers get `None`, suspended writers
    /// fail; buffered values stay readable.
    pub fn close(&self) {
        let (readers, writers) = self.core.close();
        if readers + writers > 0 {
            tracing::debug!(readers, writers, "channel closed with suspended waiters");
        }
    }
}

impl<T, G: Guard> Drop for Channel<T, G> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T, G: Guard> fmt::Debug for Channel<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.with(|s| {
            f.debug_struct("Channel")
                .field("capacity", &s.capacity)
                .field("buffered", &s.buffer.len())
                .field("readers", &s.readers.len())
                .field("writers", &s.writers.len())
                .field("closed", &s.closed)
                .finish()
        })
    }
}

enum ReadStep<T> {
    Got(T, Option<Waiter<()>>),
    Closed,
    Suspended(WaitFor<T>),
}

/// Future returned by [`Channel::read`].
#[must_use = "futures do nothing unless polled"]
pub struct Read<T, G: Guard = Locked> {
    core: Arc<Core<T, G>>,
    wait: Option<WaitFor<T>>,
    done: bool,
}

impl<T, G: Guard> Future for Read<T, G> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(wait) = this.wait.as_mut() {
            let out = std::task::ready!(Pin::new(wait).poll(cx));
            this.wait = None;
            this.done = true;
            return Poll::Ready(out);
        }

        let step = this.core.with(|s| match s.take() {
            Some((value, writer)) => ReadStep::Got(value, writer),
            None if s.closed => ReadStep::Closed,
            None => {
                let (waiter, wait) = waiter::register(cx.waker());
                s.readers.push_back(waiter);
                ReadStep::Suspended(wait)
            }
        });
        match step {
            ReadStep::Got(value, writer) => {
                if let Some(writer) = writer {
                    let _ = writer.resume(());
                }
                this.done = true;
                Poll::Ready(Some(value))
            }
            ReadStep::Closed => {
                this.done = true;
                Poll::Ready(None)
            }
            ReadStep::Suspended(wait) => {
                this.wait = Some(wait);
                Poll::Pending
            }
        }
    }
}

impl<T, G: Guard> Drop for Read<T, G> {
    fn drop(&mut self) {
        let Some(value) = self.wait.take().and_then(WaitFor::into_resumed) else {
            return;
        };
        if self.core.requeue(value).is_some() {
            tracing::debug!("value handed to a dropped read was discarded");
        }
    }
}

enum WriteStep<T> {
    Buffered,
    HandOff(Waiter<T>, T),
    Closed(T),
    Suspended(WaitFor<()>),
}

/// Future returned by [`Channel::write`].
#[must_use = "futures do nothing unless polled"]
pub struct Write<T, G: Guard = Locked> {
    core: Arc<Core<T, G>>,
    value: Option<T>,
    wait: Option<WaitFor<()>>,
}

// The value is only moved out, never pinned.
impl<T, G: Guard> Unpin for Write<T, G> {}

impl<T, G: Guard> Future for Write<T, G> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if let Some(wait) = this.wait.as_mut() {
            let out = std::task::ready!(Pin::new(wait).poll(cx));
            this.wait = None;
            return Poll::Ready(out.ok_or(Error::Closed("channel")));
        }
        let Some(mut value) = this.value.take() else {
            return Poll::Ready(Err(Error::usage("write polled after completion")));
        };

        loop {
            let step = this.core.with(|s| {
                if s.closed {
                    return WriteStep::Closed(value);
                }
                if let Some(reader) = s.pop_reader() {
                    return WriteStep::HandOff(reader, value);
                }
                if s.buffer.len() < s.capacity {
                    s.buffer.push_back(value);
                    return WriteStep::Buffered;
                }
                let (waiter, wait) = waiter::register(cx.waker());
                s.writers.push_back((waiter, value));
                WriteStep::Suspended(wait)
            });
            match step {
                WriteStep::Buffered => return Poll::Ready(Ok(())),
                WriteStep::Closed(value) => {
                    drop(value);
                    return Poll::Ready(Err(Error::Closed("channel")));
                }
                WriteStep::Suspended(wait) => {
                    this.wait = Some(wait);
                    return Poll::Pending;
                }
                WriteStep::HandOff(reader, v) => match reader.resume(v) {
                    Ok(()) => return Poll::Ready(Ok(())),
                    // Reader went away between pop and resume; try again.
                    Err(v) => value = v,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Unlocked;
    use futures::FutureExt;
    use std::sync::Mutex;
    use strand_rt::Driver;

    fn fifo_law(capacity: usize) {
        let driver = Driver::new().unwrap();
        let channel = Arc::new(Channel::<i32>::new(capacity));

        let writer = {
            let channel = channel.clone();
            driver.spawn(async move {
                for v in [1, 2, 3] {
                    channel.write(v).await.unwrap();
                }
            })
        };
        let reader = {
            let channel = channel.clone();
            driver.spawn(async move {
                let mut got = Vec::new();
                for _ in 0..3 {
                    got.push(channel.read().await.unwrap());
                }
                got
            })
        };

        assert_eq!(driver.block_on(reader).unwrap(), vec![1, 2, 3]);
        driver.block_on(writer).unwrap();
    }

    #[test]
    fn fifo_holds_for_every_capacity() {
        for capacity in [0, 1, 2, 3, 8] {
            fifo_law(capacity);
        }
    }

    #[test]
    fn buffered_write_completes_immediately() {
        let channel = Channel::<&str>::new(2);
        assert_eq!(channel.write("a").now_or_never().unwrap().ok(), Some(()));
        assert_eq!(channel.write("b").now_or_never().unwrap().ok(), Some(()));
        assert!(channel.write("c").now_or_never().is_none(), "full buffer suspends");
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn rendezvous_requires_a_reader() {
        let channel = Channel::<u8>::rendezvous();
        assert!(matches!(channel.try_write(1), Err(TryWriteError::Full(1))));

        let mut read = channel.read();
        assert!((&mut read).now_or_never().is_none());
        channel.try_write(7).unwrap();
        assert_eq!(read.now_or_never(), Some(Some(7)));
        assert!(channel.is_empty());
    }

    #[test]
    fn suspended_writer_refills_buffer_in_order() {
        let channel = Channel::<u32>::new(1);
        channel.try_write(1).unwrap();
        let mut second = channel.write(2);
        assert!((&mut second).now_or_never().is_none());

        assert_eq!(channel.try_read(), Some(1));
        assert_eq!(second.now_or_never().map(|r| r.is_ok()), Some(true));
        assert_eq!(channel.try_read(), Some(2));
        assert_eq!(channel.try_read(), None);
    }

    #[test]
    fn closed_channel_drains_then_fails() {
        let channel = Channel::<i32>::new(4);
        channel.try_write(10).unwrap();
        channel.close();

        assert!(matches!(channel.try_write(11), Err(TryWriteError::Closed(11))));
        let err = channel.write(12).now_or_never().unwrap().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(channel.read().now_or_never(), Some(Some(10)));
        assert_eq!(channel.read().now_or_never(), Some(None));
        assert_eq!(channel.read_or_default().now_or_never(), Some((0, false)));
    }

    #[test]
    fn dropping_channel_resolves_suspended_reader() {
        let driver = Driver::new().unwrap();
        let channel = Channel::<String>::new(1);
        let read = channel.read_or_default();
        let reader = driver.spawn(read);
        driver.run_until_idle().unwrap();
        assert!(!reader.is_finished());

        drop(channel);
        assert_eq!(driver.block_on(reader).unwrap(), (String::new(), false));
    }

    #[test]
    fn dropping_channel_fails_suspended_writer() {
        let driver = Driver::new().unwrap();
        let channel = Channel::<u8>::rendezvous();
        let writer = driver.spawn(channel.write(3));
        driver.run_until_idle().unwrap();

        drop(channel);
        assert!(driver.block_on(writer).unwrap().unwrap_err().is_closed());
    }

    #[test]
    fn cancelled_reader_is_skipped() {
        let channel = Channel::<u8>::rendezvous();
        let mut first = channel.read();
        let mut second = channel.read();
        assert!((&mut first).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_none());
        drop(first);

        channel.try_write(9).unwrap();
        assert_eq!(second.now_or_never(), Some(Some(9)));
    }

    #[test]
    fn cancelled_writer_value_dropped_outside_the_guard() {
        use std::cell::Cell;
        use std::rc::{Rc, Weak};

        struct Tracked {
            channel: Weak<Channel<Tracked, Unlocked>>,
            seen_len: Rc<Cell<Option<usize>>>,
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                if let Some(channel) = self.channel.upgrade() {
                    self.seen_len.set(Some(channel.len()));
                }
            }
        }

        let channel = Rc::new(Channel::<Tracked, Unlocked>::new(1));
        let seen_len = Rc::new(Cell::new(None));
        let make = || Tracked {
            channel: Rc::downgrade(&channel),
            seen_len: seen_len.clone(),
        };

        channel.try_write(make()).unwrap();
        let mut blocked = channel.write(make());
        assert!((&mut blocked).now_or_never().is_none());
        drop(blocked);

        // Taking the buffered value skips the cancelled writer and drops its
        // value, whose destructor reads the channel again.
        let first = channel.try_read().unwrap();
        assert_eq!(seen_len.get(), Some(0));
        drop(first);
    }

    #[test]
    fn value_handed_to_dropped_read_goes_back_to_buffer() {
        let channel = Channel::<u8>::new(1);
        let mut read = channel.read();
        assert!((&mut read).now_or_never().is_none());

        channel.try_write(5).unwrap();
        drop(read);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.try_read(), Some(5));
    }

    #[test]
    fn value_handed_to_dropped_read_goes_to_next_reader() {
        let channel = Channel::<u8>::rendezvous();
        let mut first = channel.read();
        let mut second = channel.read();
        assert!((&mut first).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_none());

        channel.try_write(6).unwrap();
        drop(first);
        assert_eq!(second.now_or_never(), Some(Some(6)));
    }

    #[test]
    fn readers_released_in_registration_order() {
        let driver = Driver::new().unwrap();
        let channel = Arc::new(Channel::<u32>::rendezvous());
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let read = channel.read();
            let log = log.clone();
            driver
                .spawn(async move {
                    let v = read.await.unwrap();
                    log.lock().unwrap().push((id, v));
                })
                .detach();
        }
        driver.run_until_idle().unwrap();
        for v in [100, 200, 300] {
            channel.try_write(v).unwrap();
        }
        driver.run_until_idle().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![(0, 100), (1, 200), (2, 300)]);
    }

    #[test]
    fn cross_thread_writer_wakes_reader() {
        let driver = Driver::new().unwrap();
        let channel = Arc::new(Channel::<u64>::new(0));
        let read = channel.read();

        let producer = {
            let channel = channel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                futures::executor::block_on(channel.write(99)).unwrap();
            })
        };
        assert_eq!(driver.block_on(read).unwrap(), Some(99));
        producer.join().unwrap();
    }

    #[test]
    fn unlocked_channel_under_one_scheduler() {
        let driver = Driver::new().unwrap();
        let channel = std::rc::Rc::new(Channel::<u32, Unlocked>::new(0));
        let tx = channel.clone();
        driver
            .spawn_local(async move {
                for v in 0..4 {
                    tx.write(v).await.unwrap();
                }
            })
            .detach();

        let rx = channel.clone();
        let sum = driver
            .block_on(async move {
                let mut sum = 0;
                for _ in 0..4 {
                    sum += rx.read().await.unwrap();
                }
                sum
            })
            .unwrap();
        assert_eq!(sum, 6);
    }
}
