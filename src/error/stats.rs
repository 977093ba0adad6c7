//! Engine-wide error counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::ErrorKind;

/// Thread-safe error counters, one per [`ErrorKind`].
///
/// All kinds are initialized to zero on creation, so increments never
/// allocate and can be called concurrently from every job task. Shared
/// across the engine via `Arc`.
pub struct ErrorStats {
    counters: HashMap<ErrorKind, AtomicUsize>,
}

impl ErrorStats {
    pub fn new() -> Self {
        let mut counters = HashMap::new();
        for kind in ErrorKind::iter() {
            counters.insert(kind, AtomicUsize::new(0));
        }
        ErrorStats { counters }
    }

    /// Increment the counter for one error kind.
    pub fn increment(&self, kind: ErrorKind) {
        if let Some(counter) = self.counters.get(&kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            // Unreachable if new() initialized every variant; log instead of
            // panicking so a missed variant can't take down a job task.
            log::error!("no counter registered for {kind:?}");
        }
    }

    /// Current count for one error kind.
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.counters
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of all counters.
    pub fn total(&self) -> usize {
        self.counters
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Non-zero counters as `(kind, count)` pairs, highest first.
    pub fn nonzero(&self) -> Vec<(ErrorKind, usize)> {
        let mut entries: Vec<_> = ErrorKind::iter()
            .map(|kind| (kind, self.count(kind)))
            .filter(|(_, count)| *count > 0)
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs a summary of accumulated errors, highest counts first.
pub fn log_error_statistics(stats: &ErrorStats) {
    let entries = stats.nonzero();
    if entries.is_empty() {
        log::info!("No errors recorded");
        return;
    }
    log::info!("Error statistics ({} total):", stats.total());
    for (kind, count) in entries {
        log::info!("  {kind}: {count}");
    }
}
