//! Readiness notifications for raw file descriptors.
//!
//! Registers a raw fd with the driver's reactor and provides async
//! readability/writability polling.

use std::os::fd::RawFd;
use std::task::Poll;

use crate::driver::Handle;
use crate::error::Result;

/// A file descriptor registered with a driver's reactor.
///
/// `Registration` does NOT own the file descriptor, only the reactor entry.
/// The caller must keep the fd open until the registration is dropped.
pub struct Registration {
    handle: Handle,
    key: usize,
    fd: RawFd,
}

impl Registration {
    pub(crate) fn new(handle: Handle, fd: RawFd) -> Self {
        let key = handle.shared.reactor.io_register(fd);
        Registration { handle, key, fd }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Wait until the fd is readable.
    ///
    /// After this returns `Ok(())`, attempt the read. If it returns
    /// `WouldBlock`, call `readable()` again (spurious wake).
    pub async fn readable(&self) -> Result<()> {
        std::future::poll_fn(|cx| -> Poll<Result<()>> {
            let poll = self
                .handle
                .shared
                .reactor
                .io_poll_readable(self.key, cx.waker())?;
            poll.map(Ok)
        })
        .await
    }

    /// Wait until the fd is writable.
    pub async fn writable(&self) -> Result<()> {
        std::future::poll_fn(|cx| -> Poll<Result<()>> {
            let poll = self
                .handle
                .shared
                .reactor
                .io_poll_writable(self.key, cx.waker())?;
            poll.map(Ok)
        })
        .await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(err) = self.handle.shared.reactor.io_deregister(self.key) {
            // The fd may already be closed by its owner.
            tracing::warn!(fd = self.fd, error = %err, "failed to deregister io source");
        }
    }
}
