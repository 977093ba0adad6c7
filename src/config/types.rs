//! Configuration types and CLI options.

use std::path::PathBuf;

use clap::ValueEnum;

use crate::config::constants::{
    DEFAULT_DB_PATH, DEFAULT_IMAGE_DIR, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_PROXY_FILE,
    DEFAULT_USER_AGENT, MAX_ITEMS_HARD_CAP,
};

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Engine configuration.
///
/// Can be constructed programmatically (the library path) or parsed from the
/// command line by the CLI binary. Every field has a sensible default.
///
/// # Examples
///
/// ```no_run
/// use listing_engine::Config;
/// use std::path::PathBuf;
///
/// let config = Config {
///     proxy_file: PathBuf::from("proxies.json"),
///     max_concurrent_jobs: 5,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, clap::Parser)]
#[command(
    name = "listing_engine",
    about = "Scrapes marketplace product listings through proxied, rate-limited fetching"
)]
pub struct Config {
    /// Path to the proxy list (JSON array of {host, port, username?, password?, protocol?})
    #[arg(long, default_value = DEFAULT_PROXY_FILE)]
    pub proxy_file: PathBuf,

    /// SQLite database path for persisted products
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Root directory for processed images
    #[arg(long, default_value = DEFAULT_IMAGE_DIR)]
    pub image_dir: PathBuf,

    /// Maximum number of jobs executing concurrently
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_JOBS)]
    pub max_concurrent_jobs: usize,

    /// Hard cap on items per job; submits above this are rejected
    #[arg(long, default_value_t = MAX_ITEMS_HARD_CAP)]
    pub max_items_cap: usize,

    /// HTTP User-Agent header value
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_file: PathBuf::from(DEFAULT_PROXY_FILE),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_items_cap: MAX_ITEMS_HARD_CAP,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_level: LogLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(
            log::LevelFilter::from(LogLevel::Error),
            log::LevelFilter::Error
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Info),
            log::LevelFilter::Info
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Trace),
            log::LevelFilter::Trace
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_jobs, DEFAULT_MAX_CONCURRENT_JOBS);
        assert_eq!(config.max_items_cap, MAX_ITEMS_HARD_CAP);
        assert!(!config.user_agent.is_empty());
    }
}
