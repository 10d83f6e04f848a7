//! Activity-based timeout timer.
//!
//! The timer checks activity six times per interval. A lazy timer fires when
//! a full interval passes without the deadline being extended; an eager timer
//! fires at five sixths of the interval, early enough for a heartbeat to
//! reach the other side before its own lazy timer expires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle to a running timeout timer.
pub struct TimeoutTimer {
    last_extended: Arc<Mutex<Instant>>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TimeoutTimer {
    /// Start a lazy timer: fires after `duration` without an extend.
    pub fn lazy<F>(duration: Duration, on_timeout: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::start(duration, duration, on_timeout)
    }

    /// Start an eager timer: fires at five sixths of `duration`.
    pub fn eager<F>(duration: Duration, on_timeout: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::start(duration, duration * 5 / 6, on_timeout)
    }

    fn start<F>(duration: Duration, threshold: Duration, mut on_timeout: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let last_extended = Arc::new(Mutex::new(Instant::now()));
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let timer = Self {
            last_extended: last_extended.clone(),
            paused: paused.clone(),
            cancel: cancel.clone(),
        };

        let check_interval = duration / 6;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(check_interval) => {}
                }
                if paused.load(Ordering::Acquire) {
                    continue;
                }
                let elapsed = last_extended
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .elapsed();
                if elapsed >= threshold {
                    on_timeout();
                    *last_extended.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
                }
            }
        });

        timer
    }

    /// Push the deadline a full interval into the future.
    pub fn extend(&self) {
        *self
            .last_extended
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Suspend firing until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume firing. The deadline restarts from now.
    pub fn resume(&self) {
        self.extend();
        self.paused.store(false, Ordering::Release);
    }

    /// Stop the timer for good.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_timer_fires_after_a_quiet_interval() {
        let (count, on_timeout) = counter();
        let _timer = TimeoutTimer::lazy(Duration::from_secs(6), on_timeout);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_defers_the_lazy_timer() {
        let (count, on_timeout) = counter();
        let timer = TimeoutTimer::lazy(Duration::from_secs(6), on_timeout);

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            timer.extend();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eager_timer_fires_before_the_interval_ends() {
        let (count, on_timeout) = counter();
        let _timer = TimeoutTimer::eager(Duration::from_secs(6), on_timeout);

        // Eager threshold is 5s; the check at 5s fires.
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_timer_does_not_fire() {
        let (count, on_timeout) = counter();
        let timer = TimeoutTimer::lazy(Duration::from_secs(6), on_timeout);
        timer.pause();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        timer.resume();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_stops() {
        let (count, on_timeout) = counter();
        let timer = TimeoutTimer::lazy(Duration::from_secs(6), on_timeout);
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
