//! Cooperative concurrency runtime.
//!
//! [`rt`] holds the suspension/resumption core: continuation tokens, ready
//! queues, the driver and its reactor. [`sync`] holds the primitives built on
//! it: events, channels with select, latches and per-thread mailboxes.
//!
//! ```
//! use strand::rt::Driver;
//! use strand::sync::{Channel, Event};
//!
//! let driver = Driver::new()?;
//! let ready: Event = Event::manual();
//! let channel = Channel::<&str>::new(1);
//!
//! let greeting = channel.write("hello");
//! let wait = ready.wait();
//! let task = driver.spawn(async move {
//!     wait.await?;
//!     greeting.await
//! });
//!
//! ready.set();
//! assert_eq!(driver.block_on(channel.read())?, Some("hello"));
//! driver.block_on(task)??;
//! # Ok::<(), strand::Error>(())
//! ```

pub use strand_rt as rt;
pub use strand_sync as sync;

pub use strand_rt::{Driver, Error, Handle, Result};
pub use strand_sync::{select, Channel, Event, Latch, Reset, Select, ThreadRegistry};
