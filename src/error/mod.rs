//! Error handling and error statistics.
//!
//! This module provides:
//! - The tagged [`StepError`] outcome type inspected by the controller's
//!   retry loop (retryable vs. blocked vs. fatal)
//! - Submit-time validation errors and terminal job failure reasons
//! - Thread-safe engine-wide error counters

mod stats;
mod types;

// Re-export public API
pub use stats::{log_error_statistics, ErrorStats};
pub use types::{ErrorKind, JobError, ProxyConfigError, StepError, StorageError, SubmitError};
