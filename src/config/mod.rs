//! Engine configuration and constants.
//!
//! This module provides:
//! - Operational constants (timeouts, limits, windows)
//! - CLI option types and parsing

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, LogLevel};
