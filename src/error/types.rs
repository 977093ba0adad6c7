//! Error type definitions.
//!
//! Failures inside a running job are expressed as a tagged [`StepError`]
//! rather than being thrown through the call stack: the controller's retry
//! loop inspects the tag to decide between retrying with a fresh proxy,
//! recording a partial failure, or failing the job outright.

use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Outcome of one fetch or extraction step inside a job.
///
/// The tag drives the controller's retry loop:
/// - `Retryable`: transient network conditions (timeout, 5xx, 429,
///   unreachable proxy); the job backs off and retries with a new proxy.
/// - `Blocked`: an anti-automation response was recognized (challenge page,
///   captcha, 403 wall). Also retried, but the current proxy is reported as
///   failed so rotation moves off the burned identity.
/// - `Fatal`: malformed markup, unsupported responses, or programmer error;
///   never retried.
#[derive(Error, Debug)]
pub enum StepError {
    /// Transient failure; retry with backoff and a different proxy.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Anti-automation block detected; retry after rotating the proxy.
    #[error("blocked by target: {0}")]
    Blocked(String),

    /// Permanent failure; do not retry.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StepError {
    /// Whether the controller should retry the fetch pass after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Retryable(_) | StepError::Blocked(_))
    }

    /// Classifies a `reqwest::Error` from a page fetch.
    ///
    /// Timeouts, connection failures, and 5xx/429 statuses are transient.
    /// 403 is treated as block detection: marketplaces answer automated
    /// traffic with 403 walls far more often than with real authorization
    /// failures. Remaining 4xx are permanent.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            let code = status.as_u16();
            if code == 403 {
                return StepError::Blocked(format!("HTTP 403 for {}", display_url(error)));
            }
            if code == 429 || status.is_server_error() {
                return StepError::Retryable(format!("HTTP {code} for {}", display_url(error)));
            }
            if status.is_client_error() {
                return StepError::Fatal(format!("HTTP {code} for {}", display_url(error)));
            }
        }
        if error.is_timeout() || error.is_connect() || error.is_request() {
            return StepError::Retryable(error.to_string());
        }
        StepError::Fatal(error.to_string())
    }
}

fn display_url(error: &reqwest::Error) -> String {
    error
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "<unknown url>".to_string())
}

/// Rejection reasons for [`submit`](crate::Engine::submit).
///
/// These are validation failures: the job is never created and the retry
/// machinery is never involved.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The requested platform is not in the supported set.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// `max_items` is outside `[1, cap]`.
    #[error("max_items {requested} outside allowed range [1, {cap}]")]
    MaxItemsOutOfRange {
        /// Requested item count.
        requested: usize,
        /// Configured hard cap.
        cap: usize,
    },

    /// A job with this id already exists.
    #[error("duplicate job id: {0}")]
    DuplicateJobId(String),
}

/// Terminal failure reasons recorded on a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No healthy proxy could be acquired within the bounded wait.
    #[error("no healthy proxy available")]
    NoProxyAvailable,

    /// Retries were exhausted; carries the last step error.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    /// A non-retryable step failure ended the job.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The job exceeded the wall-clock ceiling and was reclaimed by sweep.
    #[error("job timed out")]
    Timeout,

    /// The job task panicked; captured at the task boundary.
    #[error("job task panicked: {0}")]
    Panicked(String),
}

/// Error types for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQL execution error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Record serialization error (image path list, specifications).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error types for proxy pool construction.
#[derive(Error, Debug)]
pub enum ProxyConfigError {
    /// The proxy list file could not be read.
    #[error("failed to read proxy file: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy list file is not valid JSON.
    #[error("failed to parse proxy file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine-wide error categories tracked by [`ErrorStats`](super::ErrorStats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorKind {
    /// Page fetch timed out.
    FetchTimeout,
    /// Connection to the target or proxy failed.
    ConnectError,
    /// 5xx response from the target.
    ServerError,
    /// 429 response from the target.
    RateLimited,
    /// Anti-automation block detected.
    BlockDetected,
    /// Field extraction from fetched markup failed.
    ExtractError,
    /// Image download failed after retries.
    ImageDownloadError,
    /// Image rejected by validation (dimensions, size, decode).
    ImageInvalid,
    /// Persisting a product record failed.
    StorageError,
    /// A job failed because the proxy pool was exhausted.
    NoProxyAvailable,
    /// A job was force-failed by the sweep timeout.
    JobTimeout,
    /// A job task panicked.
    JobPanic,
}

impl ErrorKind {
    /// Human-readable label used in statistics output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FetchTimeout => "fetch timeout",
            ErrorKind::ConnectError => "connection error",
            ErrorKind::ServerError => "server error (5xx)",
            ErrorKind::RateLimited => "rate limited (429)",
            ErrorKind::BlockDetected => "block detected",
            ErrorKind::ExtractError => "extraction error",
            ErrorKind::ImageDownloadError => "image download error",
            ErrorKind::ImageInvalid => "invalid image",
            ErrorKind::StorageError => "storage error",
            ErrorKind::NoProxyAvailable => "no proxy available",
            ErrorKind::JobTimeout => "job timeout",
            ErrorKind::JobPanic => "job panic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_step_error_retryability() {
        assert!(StepError::Retryable("timeout".into()).is_retryable());
        assert!(StepError::Blocked("captcha".into()).is_retryable());
        assert!(!StepError::Fatal("bad markup".into()).is_retryable());
    }

    #[test]
    fn test_all_error_kinds_have_labels() {
        for kind in ErrorKind::iter() {
            assert!(!kind.as_str().is_empty(), "{kind:?} should have a label");
        }
    }

    #[test]
    fn test_submit_error_messages() {
        let err = SubmitError::MaxItemsOutOfRange {
            requested: 500,
            cap: 200,
        };
        assert_eq!(
            err.to_string(),
            "max_items 500 outside allowed range [1, 200]"
        );
        assert_eq!(
            SubmitError::UnsupportedPlatform("etsy".into()).to_string(),
            "unsupported platform: etsy"
        );
    }

    #[test]
    fn test_job_error_messages() {
        assert_eq!(
            JobError::NoProxyAvailable.to_string(),
            "no healthy proxy available"
        );
        assert_eq!(JobError::Timeout.to_string(), "job timed out");
    }
}
