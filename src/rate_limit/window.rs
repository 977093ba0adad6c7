//! Fixed-window request quota for one target.

use std::time::{Duration, Instant};

/// Request-count quota over a fixed time window.
///
/// The counter never exceeds `allowed` within one window: callers must check
/// [`remaining_wait`](RateWindow::remaining_wait) and only
/// [`record`](RateWindow::record) a request when it returns zero. Both calls
/// roll the window forward when the period has elapsed.
#[derive(Debug)]
pub(crate) struct RateWindow {
    allowed: u32,
    period: Duration,
    count: u32,
    window_start: Instant,
}

impl RateWindow {
    pub(crate) fn new(allowed: u32, period: Duration) -> Self {
        RateWindow {
            allowed,
            period,
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.period {
            self.count = 0;
            self.window_start = now;
        }
    }

    /// Time until one more request fits in the window. Zero means capacity
    /// is available right now.
    pub(crate) fn remaining_wait(&mut self, now: Instant) -> Duration {
        self.roll(now);
        if self.count < self.allowed {
            Duration::ZERO
        } else {
            self.period
                .saturating_sub(now.duration_since(self.window_start))
        }
    }

    /// Counts one request against the current window.
    pub(crate) fn record(&mut self, now: Instant) {
        self.roll(now);
        self.count += 1;
    }

    pub(crate) fn allowed(&self) -> u32 {
        self.allowed
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}
