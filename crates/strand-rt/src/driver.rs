use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use async_task::{Builder, Runnable, Task};

use crate::backend::{Backend, PollingBackend};
use crate::config::DriverConfig;
use crate::continuation::{Continuation, TaskId};
use crate::error::Result;
use crate::reactor::Reactor;
use crate::ready::{ReadyQueue, ReadySet, SignalQueue};
use crate::timer::Sleep;

/// Handle to a spawned task. Dropping it cancels the task; call `detach()`
/// to let it run to completion unobserved.
pub type JoinHandle<T> = Task<T, TaskId>;

/// State shared between the driver, its handles and every task's scheduler.
pub(crate) struct Shared {
    pub(crate) signals: SignalQueue,
    pub(crate) reactor: Reactor,
    next_id: AtomicU64,
    /// True while the driving thread may be blocked inside the backend.
    parked: AtomicBool,
}

impl Shared {
    /// Schedule function for async-task. Safe to call from wakers on any thread.
    fn schedule(&self, runnable: Runnable<TaskId>) {
        if let Err(mut token) = self.signals.signal(Continuation::new(runnable)) {
            // Driver is gone; nobody will ever resume this.
            token.release();
            return;
        }
        if self.parked.load(Ordering::SeqCst) {
            self.unpark();
        }
    }

    fn unpark(&self) {
        if let Err(err) = self.reactor.notify() {
            tracing::warn!(error = %err, "failed to unpark driver");
        }
    }

    fn next_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn scheduler(self: &Arc<Self>) -> impl Fn(Runnable<TaskId>) + Send + Sync + 'static {
        let weak: Weak<Shared> = Arc::downgrade(self);
        move |runnable| match weak.upgrade() {
            Some(shared) => shared.schedule(runnable),
            None => drop(runnable),
        }
    }

    fn ready(&self, timeout: Option<Duration>) -> Result<ReadySet> {
        let set = self.signals.drain_batch();
        if !set.is_empty() {
            return Ok(set);
        }

        // Publish `parked` before the final emptiness check so a concurrent
        // schedule() either lands in the queue we check or notifies the backend.
        self.parked.store(true, Ordering::SeqCst);
        let wait = if self.signals.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        let reacted = self.reactor.react(wait);
        self.parked.store(false, Ordering::SeqCst);
        reacted?;

        Ok(self.signals.drain_batch())
    }
}

/// Drives suspended computations: a signal queue of runnable continuations
/// plus a reactor that turns IO readiness and timers into signals.
///
/// A driver is an explicit object, not a process global. It is meant to be
/// driven from one thread at a time; wakeups may come from any thread.
pub struct Driver {
    shared: Arc<Shared>,
    config: DriverConfig,
}

impl Driver {
    pub fn new() -> Result<Self> {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Result<Self> {
        let backend = PollingBackend::with_capacity(config.event_capacity)?;
        Ok(Self::with_backend(Box::new(backend), config))
    }

    /// Build a driver over a custom poller backend.
    pub fn with_backend(backend: Box<dyn Backend>, config: DriverConfig) -> Self {
        let shared = Shared {
            signals: SignalQueue::new(config.max_batch),
            reactor: Reactor::new(backend, config.event_capacity),
            next_id: AtomicU64::new(0),
            parked: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(shared),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn a future and queue its first continuation.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }

    /// Spawn a `!Send` future. Its continuations must be resumed on the
    /// calling thread; resuming one elsewhere panics.
    pub fn spawn_local<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let id = self.shared.next_id();
        let (runnable, task) = Builder::new()
            .metadata(id)
            .spawn_local(move |_| future, self.shared.scheduler());
        tracing::debug!(task = %id, "spawned local task");
        runnable.schedule();
        task
    }

    /// Create a task without queueing it. The caller owns its first
    /// continuation and decides where it runs; later wakeups come back to
    /// this driver.
    pub fn prepare<F>(&self, future: F) -> (Continuation, JoinHandle<F::Output>)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().prepare(future)
    }

    /// Resume one queued continuation. Returns true if one was resumed.
    pub fn try_tick(&self) -> bool {
        match self.shared.signals.pop() {
            Some(token) => {
                token.resume();
                true
            }
            None => false,
        }
    }

    /// Resume continuations without blocking until nothing is runnable.
    /// Expired timers and already-reported IO count as runnable.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut resumed = 0;
        loop {
            let set = self.ready(Some(Duration::ZERO))?;
            if set.is_empty() {
                return Ok(resumed);
            }
            resumed += set.resume_all();
        }
    }

    /// Drive this driver on the current thread until `future` completes.
    ///
    /// The future itself is polled in place (it need not be `Send`), and
    /// spawned tasks make progress in between.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let mut future = pin!(future);
        let main = Arc::new(MainWaker {
            woken: AtomicBool::new(true),
            shared: Arc::downgrade(&self.shared),
        });
        let waker = Waker::from(main.clone());
        let mut cx = Context::from_waker(&waker);
        let mut did_work = false;

        loop {
            if main.woken.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
            }

            let timeout = if main.woken.load(Ordering::SeqCst) {
                Duration::ZERO
            } else if did_work {
                self.config.busy_wait
            } else {
                self.config.idle_wait
            };
            let set = self.ready(Some(timeout))?;
            did_work = set.resume_all() > 0;
        }
    }
}

impl ReadyQueue for Driver {
    fn ready(&self, timeout: Option<Duration>) -> Result<ReadySet> {
        self.shared.ready(timeout)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let released = self.shared.signals.close();
        self.shared.reactor.shutdown();
        if released > 0 {
            tracing::debug!(released, "driver dropped with queued continuations");
        }
    }
}

/// Waker for the future passed to `block_on`.
struct MainWaker {
    woken: AtomicBool,
    shared: Weak<Shared>,
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::SeqCst);
        // Unconditional: the driving thread may be about to park.
        if let Some(shared) = self.shared.upgrade() {
            shared.unpark();
        }
    }
}

/// Cloneable access to a driver from inside its tasks.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Arc<Shared>,
}

impl Handle {
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (token, task) = self.prepare(future);
        tracing::debug!(task = %token.id(), "spawned task");
        if let Err(mut token) = self.shared.signals.signal(token) {
            token.release();
        } else if self.shared.parked.load(Ordering::SeqCst) {
            self.shared.unpark();
        }
        task
    }

    pub fn prepare<F>(&self, future: F) -> (Continuation, JoinHandle<F::Output>)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (runnable, task) = Builder::new()
            .metadata(self.shared.next_id())
            .spawn(move |_| future, self.shared.scheduler());
        (Continuation::new(runnable), task)
    }

    /// A future that completes after `duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.sleep_until(Instant::now() + duration)
    }

    pub fn sleep_until(&self, deadline: Instant) -> Sleep {
        Sleep::new(self.clone(), deadline)
    }

    /// Register a raw fd for readiness notifications.
    #[cfg(unix)]
    pub fn register(&self, fd: std::os::fd::RawFd) -> crate::io::Registration {
        crate::io::Registration::new(self.clone(), fd)
    }
}
