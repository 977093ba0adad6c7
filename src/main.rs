//! CLI binary: submits one scraping job and polls it to completion.
//!
//! All core functionality lives in the library crate; this wrapper handles
//! argument parsing, logger initialization, and user-facing output.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use listing_engine::error::log_error_statistics;
use listing_engine::{
    Config, Engine, ImagePipeline, JobParams, JobView, Platform, ProxyPool, RateLimiter,
    ScrapeFilters, SqliteStorage,
};

#[derive(Debug, Parser)]
#[command(
    name = "listing_engine",
    about = "Scrapes marketplace product listings through proxied, rate-limited fetching"
)]
struct Cli {
    /// Marketplace to scrape
    #[arg(value_enum)]
    platform: Platform,

    /// Search query
    query: String,

    /// Number of items to scrape
    #[arg(long, default_value_t = 10)]
    max_items: usize,

    /// Minimum price filter
    #[arg(long)]
    min_price: Option<f64>,

    /// Maximum price filter
    #[arg(long)]
    max_price: Option<f64>,

    /// Category filter
    #[arg(long)]
    category: Option<String>,

    /// Condition filter (new, used)
    #[arg(long)]
    condition: Option<String>,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.config.log_level.clone().into())
        .init();

    match run(cli).await {
        Ok(view) => {
            println!(
                "{}: {} item{} scraped in {:.1}s ({} error{})",
                view.status,
                view.items_scraped,
                if view.items_scraped == 1 { "" } else { "s" },
                view.duration_secs,
                view.error_count,
                if view.error_count == 1 { "" } else { "s" },
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("listing_engine error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<JobView> {
    let config = &cli.config;

    let proxies = if config.proxy_file.exists() {
        ProxyPool::from_file(&config.proxy_file)
            .with_context(|| format!("failed to load {}", config.proxy_file.display()))?
    } else {
        log::warn!(
            "proxy file {} not found; jobs will fail without proxies",
            config.proxy_file.display()
        );
        ProxyPool::new(Vec::new())
    };

    let images = ImagePipeline::new(config.image_dir.clone())
        .context("failed to build image pipeline")?;
    let storage = Arc::new(
        SqliteStorage::connect(&config.db_path)
            .await
            .with_context(|| format!("failed to open {}", config.db_path.display()))?,
    );

    let engine = Engine::builder(proxies, images, storage)
        .rate_limiter(RateLimiter::new())
        .max_concurrent_jobs(config.max_concurrent_jobs)
        .max_items_cap(config.max_items_cap)
        .user_agent(config.user_agent.clone())
        .build();

    // Probe the pool once up front so dead proxies are evicted before the
    // job starts drawing from it.
    engine.verify_proxies().await;

    // Periodic reclamation of timed-out and expired jobs.
    let sweeper = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            sweeper.sweep().await;
        }
    });

    let job_id = engine
        .submit(
            None,
            JobParams {
                platform: cli.platform,
                query: cli.query.clone(),
                max_items: cli.max_items,
                filters: ScrapeFilters {
                    min_price: cli.min_price,
                    max_price: cli.max_price,
                    category: cli.category.clone(),
                    condition: cli.condition.clone(),
                },
            },
        )
        .await
        .context("job submission rejected")?;
    log::info!("submitted job {job_id}");

    let view = loop {
        let Some(view) = engine.status(&job_id).await else {
            anyhow::bail!("job {job_id} disappeared from the engine");
        };
        if view.status.is_terminal() {
            break view;
        }
        log::info!(
            "job {job_id}: {} {:.0}% ({}/{})",
            view.status,
            view.progress * 100.0,
            view.items_scraped,
            view.max_items
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    let metrics = engine.monitor().snapshot();
    log::info!(
        "success rate {:.0}%, mean latency {}ms, {:.1} items/min, {:.1} KiB/s",
        metrics.success_rate * 100.0,
        metrics.mean_latency.as_millis(),
        metrics.items_per_minute,
        metrics.bandwidth_bytes_per_sec / 1024.0
    );
    log_error_statistics(engine.error_stats());

    Ok(view)
}
