//! Adaptive per-target rate limiter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::window::RateWindow;
use crate::config::{RATE_BASE_DELAY, RATE_DEFAULT_REQUESTS, RATE_EMA_ALPHA, RATE_WINDOW_PERIOD};

/// Pacing state for one target key.
struct TargetState {
    window: RateWindow,
    /// Exponential moving average of request outcomes, 1.0 = all succeeding.
    success_rate: f64,
    last_request: Option<Instant>,
}

/// Observable pacing state for one target, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStats {
    /// Requests left in the current window.
    pub requests_remaining: u32,
    /// Mandatory spacing currently applied between requests.
    pub current_delay: Duration,
    /// Recent success rate (EMA).
    pub success_rate: f64,
}

/// Per-target request pacer combining a hard rate window with adaptive
/// inter-request spacing.
///
/// Two constraints apply to every request and the caller waits for the
/// **stricter** of the two:
///
/// - a fixed window (`allowed` requests per period) per target key, and
/// - a mandatory delay since the previous request to the same target,
///   `base_delay * (1 + (1 - recent_success_rate))`; the worse recent
///   requests have gone, the wider the spacing, even with window capacity
///   to spare.
///
/// Target state is created lazily on first use and lives for the process
/// lifetime. Callers report outcomes via
/// [`report_outcome`](RateLimiter::report_outcome) to feed the adaptive
/// delay.
pub struct RateLimiter {
    targets: Mutex<HashMap<String, TargetState>>,
    limits: HashMap<String, u32>,
    base_delay: Duration,
    period: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the marketplace presets (eBay 20/min,
    /// Amazon 15/min, everything else 30/min).
    pub fn new() -> Self {
        let mut limits = HashMap::new();
        limits.insert("ebay".to_string(), 20);
        limits.insert("amazon".to_string(), 15);
        Self::with_limits(limits, RATE_BASE_DELAY, RATE_WINDOW_PERIOD)
    }

    /// Creates a limiter with explicit per-target window sizes. Targets
    /// without an entry fall back to the default allowance.
    pub fn with_limits(limits: HashMap<String, u32>, base_delay: Duration, period: Duration) -> Self {
        RateLimiter {
            targets: Mutex::new(HashMap::new()),
            limits,
            base_delay,
            period,
        }
    }

    fn allowance(&self, target: &str) -> u32 {
        self.limits
            .get(target)
            .copied()
            .unwrap_or(RATE_DEFAULT_REQUESTS)
    }

    fn adaptive_delay(&self, success_rate: f64) -> Duration {
        self.base_delay.mul_f64(1.0 + (1.0 - success_rate))
    }

    /// Suspends until one more request to `target` is safe, then counts it.
    pub async fn wait(&self, target: &str) {
        let never = CancellationToken::new();
        self.wait_cancellable(target, &never).await;
    }

    /// Like [`wait`](RateLimiter::wait), but aborts early when `cancel`
    /// fires. Returns `false` if cancelled before capacity was granted; no
    /// request is counted in that case.
    pub async fn wait_cancellable(&self, target: &str, cancel: &CancellationToken) -> bool {
        loop {
            let sleep_for = {
                let mut targets = self.targets.lock().await;
                let state = targets.entry(target.to_string()).or_insert_with(|| TargetState {
                    window: RateWindow::new(self.allowance(target), self.period),
                    success_rate: 1.0,
                    last_request: None,
                });

                let now = Instant::now();
                let window_wait = state.window.remaining_wait(now);
                let spacing = self.adaptive_delay(state.success_rate);
                let spacing_wait = state
                    .last_request
                    .map(|last| spacing.saturating_sub(now.duration_since(last)))
                    .unwrap_or(Duration::ZERO);

                // Wait for the stricter of the hard window and the adaptive
                // spacing floor.
                let wait = window_wait.max(spacing_wait);
                if wait.is_zero() {
                    state.window.record(now);
                    state.last_request = Some(now);
                    return true;
                }
                wait
            };

            if sleep_for > self.period {
                log::warn!(
                    "rate limit wait for {target} is {}ms, capping at window period",
                    sleep_for.as_millis()
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => return false,
            }
            // Re-check under the lock: another task may have consumed the
            // freed capacity while we slept.
        }
    }

    /// Feeds one request outcome into the target's moving success rate.
    pub async fn report_outcome(&self, target: &str, success: bool) {
        let mut targets = self.targets.lock().await;
        if let Some(state) = targets.get_mut(target) {
            let observed = if success { 1.0 } else { 0.0 };
            state.success_rate =
                (1.0 - RATE_EMA_ALPHA) * state.success_rate + RATE_EMA_ALPHA * observed;
        }
    }

    /// Current pacing state for a target, if it has been used.
    pub async fn target_stats(&self, target: &str) -> Option<TargetStats> {
        let mut targets = self.targets.lock().await;
        let state = targets.get_mut(target)?;
        let now = Instant::now();
        // remaining_wait rolls the window so the counts below are current
        let _ = state.window.remaining_wait(now);
        Some(TargetStats {
            requests_remaining: state.window.allowed().saturating_sub(state.window.count()),
            current_delay: self.adaptive_delay(state.success_rate),
            success_rate: state.success_rate,
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(allowed: u32, base_delay: Duration, period: Duration) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert("test".to_string(), allowed);
        RateLimiter::with_limits(limits, base_delay, period)
    }

    #[tokio::test]
    async fn test_wait_within_capacity_is_immediate() {
        let limiter = limiter(5, Duration::ZERO, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait("test").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_beyond_capacity_suspends() {
        let period = Duration::from_millis(300);
        let limiter = limiter(2, Duration::ZERO, period);
        limiter.wait("test").await;
        limiter.wait("test").await;

        // Third call must suspend for > 0 and at most one period.
        let start = Instant::now();
        limiter.wait("test").await;
        let elapsed = start.elapsed();
        assert!(elapsed > Duration::ZERO);
        assert!(elapsed <= period + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_adaptive_spacing_grows_with_failures() {
        let limiter = limiter(100, Duration::from_millis(50), Duration::from_secs(60));
        limiter.wait("test").await;

        for _ in 0..20 {
            limiter.report_outcome("test", false).await;
        }
        let stats = limiter.target_stats("test").await.unwrap();
        assert!(stats.success_rate < 0.2);
        // Spacing approaches base * 2 as the success rate collapses.
        assert!(stats.current_delay > Duration::from_millis(80));

        let start = Instant::now();
        limiter.wait("test").await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_success_rate_converges_upward() {
        let limiter = limiter(100, Duration::ZERO, Duration::from_secs(60));
        limiter.wait("test").await;
        for _ in 0..10 {
            limiter.report_outcome("test", false).await;
        }
        let low = limiter.target_stats("test").await.unwrap().success_rate;
        for _ in 0..50 {
            limiter.report_outcome("test", true).await;
        }
        let high = limiter.target_stats("test").await.unwrap().success_rate;
        assert!(high > low);
        assert!(high > 0.9);
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        let period = Duration::from_secs(60);
        let limiter = limiter(1, Duration::ZERO, period);
        limiter.wait("test").await;

        // A different target has its own window and proceeds immediately.
        let start = Instant::now();
        limiter.wait("other").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_false() {
        let limiter = limiter(1, Duration::ZERO, Duration::from_secs(60));
        limiter.wait("test").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let granted = limiter.wait_cancellable("test", &cancel).await;
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_unknown_target_uses_default_allowance() {
        let limiter = RateLimiter::new();
        let stats_before = limiter.target_stats("somewhere").await;
        assert!(stats_before.is_none());
        limiter.wait("somewhere").await;
        let stats = limiter.target_stats("somewhere").await.unwrap();
        assert_eq!(stats.requests_remaining, RATE_DEFAULT_REQUESTS - 1);
    }
}
