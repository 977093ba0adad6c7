//! listing_engine library: on-demand marketplace scraping jobs.
//!
//! A [`Engine`] turns a search query into a bounded set of normalized
//! product records with downloaded, optimized images. Jobs run on a
//! fixed-size worker pool; every outbound request goes through a health-
//! scored proxy pool and a per-target adaptive rate limiter, and each
//! product's images are fetched through a bounded concurrent pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use listing_engine::{
//!     Engine, ImagePipeline, JobParams, Platform, ProxyPool, ScrapeFilters, SqliteStorage,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let proxies = ProxyPool::from_file(std::path::Path::new("proxies.json"))?;
//! let images = ImagePipeline::new("./images".into())?;
//! let storage = Arc::new(SqliteStorage::connect(std::path::Path::new("listings.db")).await?);
//! let engine = Engine::new(proxies, images, storage);
//!
//! let job_id = engine
//!     .submit(None, JobParams {
//!         platform: Platform::Ebay,
//!         query: "gold ring".to_string(),
//!         max_items: 5,
//!         filters: ScrapeFilters::default(),
//!     })
//!     .await?;
//! while let Some(view) = engine.status(&job_id).await {
//!     if view.status.is_terminal() {
//!         println!("{}: {} items", view.status, view.items_scraped);
//!         break;
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod images;
pub mod job;
pub mod monitor;
pub mod proxy;
pub mod rate_limit;
pub mod storage;
pub mod worker;

pub use config::{Config, LogLevel};
pub use error::{ErrorKind, ErrorStats, JobError, StepError, SubmitError};
pub use images::{ImagePipeline, ImageResult, ProcessedImages};
pub use job::{Engine, EngineBuilder, JobParams, JobStatus, JobView};
pub use monitor::{MetricsSnapshot, Monitor, MonitorEvent};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyPool};
pub use rate_limit::RateLimiter;
pub use storage::{MemoryStorage, ProductRecord, QueryFilters, SortOrder, SqliteStorage, Storage};
pub use worker::{Platform, RawItem, ScrapeFilters};
