//! strand-sync: suspension-based primitives on top of strand-rt.
//!
//! [`Event`] and [`Channel`] suspend the waiting computation and resume it
//! through whatever drives its continuations (usually a
//! [`strand_rt::Driver`]). [`Latch`] and [`ThreadRegistry`] are for plain OS
//! threads and block or poll instead.
//!
//! ```
//! use strand_rt::Driver;
//! use strand_sync::Channel;
//!
//! let driver = Driver::new()?;
//! let channel = Channel::<u32>::rendezvous();
//! let write = channel.write(7);
//! let writer = driver.spawn(write);
//! assert_eq!(driver.block_on(channel.read())?, Some(7));
//! driver.block_on(writer)??;
//! # Ok::<(), strand_rt::Error>(())
//! ```

pub mod channel;
pub mod event;
pub mod guard;
pub mod latch;
pub mod registry;
pub mod select;
mod waiter;

pub use channel::{Channel, Read, TryWriteError, Write};
pub use event::{Event, Reset, Wait};
pub use guard::{Guard, Locked, Unlocked};
pub use latch::Latch;
pub use registry::{LazyDelivery, Mailbox, RegistryConfig, ThreadEntry, ThreadRegistry, Unsupported};
pub use select::Select;
pub use strand_rt::{Error, Result};
