//! Driver tuning knobs.

use std::time::Duration;

/// Configuration for a [`Driver`](crate::Driver).
///
/// ```
/// use std::time::Duration;
/// use strand_rt::DriverConfig;
///
/// let config = DriverConfig::default()
///     .with_idle_wait(Duration::from_millis(2))
///     .with_max_batch(64);
/// assert_eq!(config.max_batch, 64);
/// ```
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Upper bound on a ready-queue wait after a round that did no work.
    pub idle_wait: Duration,
    /// Wait used right after a round that did work; zero means "just poll".
    pub busy_wait: Duration,
    /// Maximum number of continuations handed out by one `ready()` call.
    pub max_batch: usize,
    /// Capacity of the backend event buffer reused across waits.
    pub event_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(10),
            busy_wait: Duration::ZERO,
            max_batch: 256,
            event_capacity: 1024,
        }
    }
}

impl DriverConfig {
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    pub fn with_busy_wait(mut self, wait: Duration) -> Self {
        self.busy_wait = wait;
        self
    }

    /// A zero batch is bumped to one so a ready round always makes progress.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_driver_loop() {
        let config = DriverConfig::default();
        assert_eq!(config.idle_wait, Duration::from_millis(10));
        assert_eq!(config.busy_wait, Duration::ZERO);
        assert_eq!(config.max_batch, 256);
    }

    #[test]
    fn zero_batch_is_clamped() {
        assert_eq!(DriverConfig::default().with_max_batch(0).max_batch, 1);
    }
}
