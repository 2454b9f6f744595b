use std::io;

use thiserror::Error;

/// Errors surfaced by the runtime and the primitives built on it.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller broke an API contract (double spawn, latch over-decrement, ...).
    #[error("usage error: {0}")]
    Usage(String),

    /// A platform primitive (poller, thread, lock) failed.
    #[error("os primitive error during {op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A bounded table is full.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    /// The resource was closed or destroyed.
    #[error("resource closed: {0}")]
    Closed(&'static str),

    /// The requested path has no implementation on this host.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    pub fn os(op: &'static str, source: io::Error) -> Self {
        Error::Os { op, source }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_error_keeps_source() {
        let err = Error::os("poller wait", io::Error::other("boom"));
        assert_eq!(err.to_string(), "os primitive error during poller wait: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn closed_is_detectable() {
        assert!(Error::Closed("channel").is_closed());
        assert!(!Error::usage("x").is_closed());
    }
}
