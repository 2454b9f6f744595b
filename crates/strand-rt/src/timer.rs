//! Reactor-backed sleeping.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::driver::Handle;

/// A one-shot timer that resolves once its deadline has passed.
///
/// Created via [`Handle::sleep`] or [`Handle::sleep_until`]. Cancels the
/// timer on drop if it hasn't fired yet.
pub struct Sleep {
    handle: Handle,
    id: u64,
    deadline: Instant,
    fired: bool,
}

impl Sleep {
    pub(crate) fn new(handle: Handle, deadline: Instant) -> Self {
        let id = handle.shared.reactor.timer_create(deadline);
        Sleep {
            handle,
            id,
            deadline,
            fired: false,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.fired {
            return Poll::Ready(());
        }
        match self.handle.shared.reactor.timer_poll(self.id, cx.waker()) {
            Poll::Ready(()) => {
                self.fired = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if !self.fired {
            self.handle.shared.reactor.timer_cancel(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Driver;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn timer_50ms_completes_in_time() {
        let driver = Driver::new().unwrap();
        let handle = driver.handle();
        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = completed.clone();

        let sleep = handle.sleep(Duration::from_millis(50));
        driver
            .spawn(async move {
                sleep.await;
                completed_clone.store(true, Ordering::SeqCst);
            })
            .detach();

        let start = Instant::now();
        while !completed.load(Ordering::SeqCst) {
            driver.run_until_idle().unwrap();
            std::thread::sleep(Duration::from_millis(2));
            assert!(start.elapsed() < Duration::from_secs(2), "timer test timed out");
        }
        // The deadline was taken before `start`, so allow a little slack below 50ms.
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn dropped_sleep_never_fires() {
        let driver = Driver::new().unwrap();
        let handle = driver.handle();
        let sleep = handle.sleep(Duration::from_secs(60));
        drop(sleep);
        assert_eq!(driver.run_until_idle().unwrap(), 0);
    }

    #[test]
    fn past_deadline_is_ready_on_first_poll() {
        use futures::FutureExt;

        let driver = Driver::new().unwrap();
        let sleep = driver.handle().sleep_until(Instant::now());
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(sleep.now_or_never(), Some(()));
    }
}
