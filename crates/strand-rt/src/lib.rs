//! strand-rt: the suspension/resumption core.
//!
//! Computations are async-task tasks. Each time one becomes runnable, its
//! [`Continuation`] lands in a [`ReadyQueue`]; whoever consumes the queue
//! resumes each token exactly once. The [`Driver`] is the stock consumer: a
//! signal queue for explicit wakeups plus a reactor over a poller
//! [`Backend`] for IO readiness and timers.
//!
//! ```
//! use strand_rt::Driver;
//!
//! let driver = Driver::new()?;
//! let task = driver.spawn(async { 1 + 1 });
//! assert_eq!(driver.block_on(task)?, 2);
//! # Ok::<(), strand_rt::Error>(())
//! ```

pub mod backend;
pub mod config;
pub mod continuation;
mod driver;
pub mod error;
#[cfg(unix)]
pub mod io;
mod reactor;
pub mod ready;
pub mod thread;
pub mod timer;

pub use backend::{Backend, Interest, PollingBackend, Readiness};
pub use config::DriverConfig;
pub use continuation::{Continuation, TaskId};
pub use driver::{Driver, Handle, JoinHandle};
pub use error::{Error, Result};
pub use ready::{ReadyQueue, ReadySet, SignalQueue};
pub use thread::{ThreadAttrs, Worker};
pub use timer::Sleep;
