//! Rolling-window performance metrics.
//!
//! The job controller feeds request, item, and bandwidth events into fixed
//! windows; [`Monitor::snapshot`] derives throughput and success figures on
//! demand. Pull-based and intentionally lossy: old observations fall out of
//! the windows. An operational dashboard input, not an audit log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::System;

use crate::config::MONITOR_WINDOW_SIZE;

/// One observation fed into the monitor.
#[derive(Debug, Clone, Copy)]
pub enum MonitorEvent {
    /// A completed network request with its latency and outcome.
    Request { latency: Duration, success: bool },
    /// Items produced (persisted products).
    Items { count: u64 },
    /// Bytes transferred (page bodies, image downloads).
    Bytes { count: u64 },
}

/// Metrics derived from the current windows; recomputed on every call to
/// [`Monitor::snapshot`], never persisted.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Fraction of windowed requests that succeeded, 1.0 with no data.
    pub success_rate: f64,
    /// Mean latency over the request window.
    pub mean_latency: Duration,
    /// Windowed items per minute of wall time.
    pub items_per_minute: f64,
    /// Windowed bytes per second of wall time.
    pub bandwidth_bytes_per_sec: f64,
    /// Jobs currently executing.
    pub active_jobs: usize,
    /// Process CPU usage percentage, from the host.
    pub cpu_usage_percent: f32,
    /// Process memory usage as a percentage of total system memory.
    pub memory_usage_percent: f32,
}

struct Windows {
    requests: VecDeque<(Instant, Duration, bool)>,
    items: VecDeque<(Instant, u64)>,
    bytes: VecDeque<(Instant, u64)>,
}

impl Windows {
    fn push<T>(window: &mut VecDeque<T>, entry: T) {
        if window.len() == MONITOR_WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(entry);
    }
}

/// Rolling-window metrics aggregator.
pub struct Monitor {
    windows: Mutex<Windows>,
    active_jobs: AtomicUsize,
    system: Mutex<System>,
    start_time: Instant,
}

impl Monitor {
    pub fn new() -> Self {
        Monitor {
            windows: Mutex::new(Windows {
                requests: VecDeque::with_capacity(MONITOR_WINDOW_SIZE),
                items: VecDeque::with_capacity(MONITOR_WINDOW_SIZE),
                bytes: VecDeque::with_capacity(MONITOR_WINDOW_SIZE),
            }),
            active_jobs: AtomicUsize::new(0),
            system: Mutex::new(System::new()),
            start_time: Instant::now(),
        }
    }

    /// Appends one observation; O(1).
    pub fn record(&self, event: MonitorEvent) {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match event {
            MonitorEvent::Request { latency, success } => {
                Windows::push(&mut windows.requests, (now, latency, success));
            }
            MonitorEvent::Items { count } => {
                Windows::push(&mut windows.items, (now, count));
            }
            MonitorEvent::Bytes { count } => {
                Windows::push(&mut windows.bytes, (now, count));
            }
        }
    }

    /// Marks one more job as executing.
    pub fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one job as finished, whatever its outcome.
    pub fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }

    /// Computes current metrics from the windows and the host.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let (success_rate, mean_latency, items_per_minute, bandwidth) = {
            let windows = match self.windows.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let success_rate = if windows.requests.is_empty() {
                1.0
            } else {
                let successes = windows.requests.iter().filter(|(_, _, ok)| *ok).count();
                successes as f64 / windows.requests.len() as f64
            };

            let mean_latency = if windows.requests.is_empty() {
                Duration::ZERO
            } else {
                let total: Duration = windows.requests.iter().map(|(_, l, _)| *l).sum();
                total / windows.requests.len() as u32
            };

            (
                success_rate,
                mean_latency,
                Self::windowed_rate(&windows.items, now, self.start_time) * 60.0,
                Self::windowed_rate(&windows.bytes, now, self.start_time),
            )
        };

        let (cpu, memory) = self.host_usage();

        MetricsSnapshot {
            success_rate,
            mean_latency,
            items_per_minute,
            bandwidth_bytes_per_sec: bandwidth,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            cpu_usage_percent: cpu,
            memory_usage_percent: memory,
        }
    }

    /// Sum over the window divided by the wall time the window spans.
    /// The span is floored at one second so a single fresh observation
    /// does not read as an absurd rate.
    fn windowed_rate(window: &VecDeque<(Instant, u64)>, now: Instant, start: Instant) -> f64 {
        let total: u64 = window.iter().map(|(_, n)| *n).sum();
        if total == 0 {
            return 0.0;
        }
        let span_start = window.front().map(|(t, _)| *t).unwrap_or(start);
        let elapsed = now.duration_since(span_start).as_secs_f64().max(1.0);
        total as f64 / elapsed
    }

    fn host_usage(&self) -> (f32, f32) {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu = system.global_cpu_info().cpu_usage();
        let memory = if system.total_memory() > 0 {
            (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
        } else {
            0.0
        };
        (cpu, memory)
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_with_no_data() {
        let monitor = Monitor::new();
        let snapshot = monitor.snapshot();
        assert!((snapshot.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.mean_latency, Duration::ZERO);
        assert_eq!(snapshot.active_jobs, 0);
    }

    #[test]
    fn test_success_rate_over_window() {
        let monitor = Monitor::new();
        for i in 0..4 {
            monitor.record(MonitorEvent::Request {
                latency: Duration::from_millis(100),
                success: i % 2 == 0,
            });
        }
        let snapshot = monitor.snapshot();
        assert!((snapshot.success_rate - 0.5).abs() < 0.01);
        assert_eq!(snapshot.mean_latency, Duration::from_millis(100));
    }

    #[test]
    fn test_window_discards_old_entries() {
        let monitor = Monitor::new();
        // Fill the window with failures, then overrun it with successes.
        for _ in 0..MONITOR_WINDOW_SIZE {
            monitor.record(MonitorEvent::Request {
                latency: Duration::from_millis(1),
                success: false,
            });
        }
        for _ in 0..MONITOR_WINDOW_SIZE {
            monitor.record(MonitorEvent::Request {
                latency: Duration::from_millis(1),
                success: true,
            });
        }
        let snapshot = monitor.snapshot();
        assert!((snapshot.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_active_jobs_gauge() {
        let monitor = Monitor::new();
        monitor.job_started();
        monitor.job_started();
        assert_eq!(monitor.snapshot().active_jobs, 2);
        monitor.job_finished();
        assert_eq!(monitor.snapshot().active_jobs, 1);
    }

    #[test]
    fn test_items_per_minute_counts_window_total() {
        let monitor = Monitor::new();
        monitor.record(MonitorEvent::Items { count: 10 });
        std::thread::sleep(Duration::from_millis(50));
        monitor.record(MonitorEvent::Items { count: 5 });
        let snapshot = monitor.snapshot();
        assert!(snapshot.items_per_minute > 0.0);
    }

    #[test]
    fn test_fresh_entry_rate_is_floored_to_one_second() {
        let monitor = Monitor::new();
        monitor.record(MonitorEvent::Items { count: 10 });
        // A just-recorded entry spans almost no wall time; the rate must
        // read as at most 10 items over one second.
        let snapshot = monitor.snapshot();
        assert!(snapshot.items_per_minute <= 600.0 + f64::EPSILON);
        assert!(snapshot.items_per_minute > 0.0);
    }
}
