//! Per-target request pacing.
//!
//! Combines a hard fixed-window quota per target with an adaptive
//! inter-request delay that widens as the recent success rate drops. Shared
//! by every job task; all state lives behind one mutex sized for the small
//! number of distinct targets.

mod limiter;
mod window;

// Re-export public API
pub use limiter::{RateLimiter, TargetStats};
