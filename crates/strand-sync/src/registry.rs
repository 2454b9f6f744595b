//! Per-thread mailboxes keyed by thread identity.
//!
//! A [`ThreadRegistry`] is an explicit object; share it through an `Arc` for
//! as long as the threads using it live. Entries are created on first
//! contact and persist until the registry is dropped. A thread's mailbox is
//! initialized when that thread registers itself (explicitly or by reading
//! its own mailbox). Posts that reach an entry before then go through the
//! registry's [`LazyDelivery`] collaborator.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;
use slab::Slab;
use strand_rt::{Error, Result};

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Maximum number of thread entries.
    pub max_threads: usize,
    /// Bound of every mailbox.
    pub mailbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_threads: 64,
            mailbox_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::usage("registry max_threads must be at least 1"));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::usage("registry mailbox_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Receives posts addressed to a thread whose mailbox does not exist yet.
pub trait LazyDelivery<M>: Send + Sync {
    /// Returns whether the message was accepted.
    fn deliver(&self, thread: ThreadId, message: M) -> Result<bool>;
}

/// Default collaborator: lazy delivery is not available.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unsupported;

impl<M> LazyDelivery<M> for Unsupported {
    fn deliver(&self, _thread: ThreadId, _message: M) -> Result<bool> {
        Err(Error::NotImplemented("lazy message delivery"))
    }
}

/// Bounded concurrent FIFO.
pub struct Mailbox<M> {
    queue: ConcurrentQueue<M>,
}

impl<M> Mailbox<M> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ConcurrentQueue::bounded(capacity),
        }
    }

    /// Returns `false` if the mailbox is full.
    pub fn push(&self, message: M) -> bool {
        self.queue.push(message).is_ok()
    }

    pub fn pop(&self) -> Option<M> {
        self.queue.pop().ok()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity().unwrap_or(0)
    }
}

pub struct ThreadEntry<M> {
    thread: ThreadId,
    mailbox: OnceLock<Mailbox<M>>,
}

impl<M> ThreadEntry<M> {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// `None` until the owning thread registers itself.
    pub fn mailbox(&self) -> Option<&Mailbox<M>> {
        self.mailbox.get()
    }
}

impl<M> fmt::Debug for ThreadEntry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadEntry")
            .field("thread", &self.thread)
            .field("mailbox", &self.mailbox.get().map(Mailbox::len))
            .finish()
    }
}

struct Table<M> {
    slots: Slab<Arc<ThreadEntry<M>>>,
    index: HashMap<ThreadId, usize>,
}

pub struct ThreadRegistry<M> {
    table: RwLock<Table<M>>,
    delivery: Box<dyn LazyDelivery<M>>,
    config: RegistryConfig,
}

impl<M: Send + 'static> ThreadRegistry<M> {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::with_delivery(config, Unsupported)
    }

    pub fn with_delivery(
        config: RegistryConfig,
        delivery: impl LazyDelivery<M> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table: RwLock::new(Table {
                slots: Slab::with_capacity(config.max_threads),
                index: HashMap::with_capacity(config.max_threads),
            }),
            delivery: Box::new(delivery),
            config,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Look up or insert the entry for `thread`. `None` if the table is full.
    fn entry(&self, thread: ThreadId) -> Option<Arc<ThreadEntry<M>>> {
        {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(&key) = table.index.get(&thread) {
                return Some(table.slots[key].clone());
            }
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&key) = table.index.get(&thread) {
            return Some(table.slots[key].clone());
        }
        if table.slots.len() >= self.config.max_threads {
            return None;
        }
        let entry = Arc::new(ThreadEntry {
            thread,
            mailbox: OnceLock::new(),
        });
        let key = table.slots.insert(entry.clone());
        table.index.insert(thread, key);
        tracing::trace!(?thread, key, "thread entry created");
        Some(entry)
    }

    /// Post `message` to `thread`.
    ///
    /// Returns `Ok(false)` when the mailbox or the registry is full. Posts to
    /// a thread that has not registered its mailbox yet are handed to the
    /// lazy-delivery collaborator, whose result is returned as is.
    pub fn post_message(&self, thread: ThreadId, message: M) -> Result<bool> {
        let Some(entry) = self.entry(thread) else {
            tracing::warn!(?thread, max = self.config.max_threads, "thread registry full");
            return Ok(false);
        };
        match entry.mailbox() {
            Some(mailbox) => Ok(mailbox.push(message)),
            None => {
                tracing::debug!(?thread, "mailbox not initialized, using lazy delivery");
                self.delivery.deliver(thread, message)
            }
        }
    }

    /// Register the calling thread and initialize its mailbox.
    pub fn register_current(&self) -> Result<Arc<ThreadEntry<M>>> {
        let thread = thread::current().id();
        let entry = self
            .entry(thread)
            .ok_or(Error::CapacityExceeded("thread registry"))?;
        entry
            .mailbox
            .get_or_init(|| Mailbox::new(self.config.mailbox_capacity));
        Ok(entry)
    }

    /// Non-blocking pop from the calling thread's own mailbox.
    pub fn peek_message(&self) -> Result<Option<M>> {
        let entry = self.register_current()?;
        Ok(entry.mailbox().and_then(Mailbox::pop))
    }

    /// Peek; if empty, sleep for `timeout` and peek once more.
    ///
    /// This is a polling approximation: a message that arrives during the
    /// sleep is only seen after the full timeout.
    pub fn get_message(&self, timeout: Duration) -> Result<Option<M>> {
        if let Some(message) = self.peek_message()? {
            return Ok(Some(message));
        }
        thread::sleep(timeout);
        self.peek_message()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .contains_key(&thread)
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M> fmt::Debug for ThreadRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ThreadRegistry")
            .field("threads", &table.slots.len())
            .field("config", &self.config)
            .finish()
    }
}
