//! Configuration constants.
//!
//! Default operational parameters for the engine: concurrency bounds,
//! retry/backoff settings, rate-limit windows, and image limits. Most of
//! these can be overridden through [`Config`](super::Config).

use std::time::Duration;

// Job execution
/// Maximum jobs executing concurrently (worker pool size).
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
/// Hard cap on `max_items` per job. Requests above this are rejected at submit.
pub const MAX_ITEMS_HARD_CAP: usize = 200;
/// Maximum retries of a job's fetch pass before it is marked failed.
pub const JOB_MAX_RETRIES: u32 = 3;
/// Base delay for job retry backoff; the actual sleep is `base * retry_count`.
pub const JOB_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
/// Wall-clock ceiling for a single job. Enforced by `sweep()`, not the job task,
/// so a hung task is reclaimed even if it never reaches a cooperative check.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Terminal jobs older than this are removed by `sweep()`.
pub const JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

// Proxy pool
/// Handles with a health score below this floor are never selected and are
/// evicted on the next failure report.
pub const PROXY_HEALTH_FLOOR: f64 = 0.2;
/// Consecutive failures that force immediate eviction regardless of score.
pub const PROXY_CONSECUTIVE_FAILURE_CEILING: u32 = 5;
/// Minimum interval before the same handle may be handed out again.
pub const PROXY_MIN_REUSE_INTERVAL: Duration = Duration::from_secs(5);
/// Attempts to acquire a proxy before the job fails with `NoProxyAvailable`.
pub const PROXY_ACQUIRE_ATTEMPTS: u32 = 5;
/// Delay between proxy acquisition attempts.
pub const PROXY_ACQUIRE_DELAY: Duration = Duration::from_secs(2);
/// Timeout for the connectivity probe used by `verify_all()`.
pub const PROXY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// URL fetched through each proxy by `verify_all()`.
pub const PROXY_PROBE_URL: &str = "https://api.ipify.org?format=json";

// Rate limiting
/// Base inter-request delay; scaled up as the recent success rate drops.
pub const RATE_BASE_DELAY: Duration = Duration::from_secs(1);
/// Smoothing factor for the exponential moving average of request outcomes.
pub const RATE_EMA_ALPHA: f64 = 0.1;
/// Fallback window for targets without a platform-specific preset.
pub const RATE_DEFAULT_REQUESTS: u32 = 30;
/// Duration of one rate window.
pub const RATE_WINDOW_PERIOD: Duration = Duration::from_secs(60);

// HTTP
/// Per-request timeout for page fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default User-Agent for outbound requests. Override with `--user-agent`.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// Image pipeline
/// Concurrent downloads per `process()` call.
pub const IMAGE_CONCURRENCY: usize = 5;
/// Download attempts per image URL.
pub const IMAGE_DOWNLOAD_ATTEMPTS: usize = 3;
/// Per-attempt download timeout.
pub const IMAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(20);
/// Images smaller than this on either axis are rejected.
pub const IMAGE_MIN_DIMENSION: u32 = 300;
/// Downloads larger than this are rejected before decoding.
pub const IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;
/// Largest dimension after optimization; bigger images are downscaled.
pub const IMAGE_MAX_DIMENSION: u32 = 1200;
/// JPEG re-encode quality.
pub const IMAGE_JPEG_QUALITY: u8 = 85;

// Monitor
/// Entries kept per rolling metrics window.
pub const MONITOR_WINDOW_SIZE: usize = 100;

// Defaults for CLI arguments
pub const DEFAULT_DB_PATH: &str = "./listings.db";
pub const DEFAULT_IMAGE_DIR: &str = "./images";
pub const DEFAULT_PROXY_FILE: &str = "./proxies.json";
