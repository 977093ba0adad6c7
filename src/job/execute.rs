//! Per-job execution: proxy acquisition, the retry loop, and the
//! fetch → extract → images → persist pass.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;

use super::controller::Engine;
use super::types::{JobSlot, JobStatus};
use crate::config::{JOB_MAX_RETRIES, PROXY_ACQUIRE_ATTEMPTS, PROXY_ACQUIRE_DELAY};
use crate::error::{ErrorKind, JobError, StepError};
use crate::monitor::MonitorEvent;
use crate::proxy::ProxyHandle;
use crate::storage::ProductRecord;
use crate::worker::{FetchContext, PlatformWorker, RawItem};

/// Runs one job to a terminal state. The caller wraps this for panic
/// isolation and monitor accounting; this function owns proxy reporting
/// and the job's state transitions.
pub(super) async fn run_job(engine: &Engine, slot: &JobSlot) {
    let Some(mut proxy) = acquire_proxy(engine, slot).await else {
        if slot.cancel.is_cancelled() {
            slot.finish(JobStatus::Cancelled, None);
        } else {
            engine.error_stats().increment(ErrorKind::NoProxyAvailable);
            slot.finish(JobStatus::Failed, Some(JobError::NoProxyAvailable));
        }
        return;
    };
    slot.set_proxy(proxy.key());

    let worker = engine.worker(slot.params.platform);
    let mut processed: HashSet<String> = HashSet::new();

    loop {
        if slot.cancel.is_cancelled() {
            slot.finish(JobStatus::Cancelled, None);
            return;
        }

        let pass = match FetchContext::new(
            &proxy,
            engine.user_agent(),
            engine.rate_limiter(),
            slot.params.platform.as_str().to_string(),
            slot.cancel.clone(),
        ) {
            Ok(ctx) => run_pass(engine, slot, worker, &ctx, &mut processed).await,
            Err(e) => Err(e),
        };

        match pass {
            Ok(()) => {
                engine.proxies().report_success(&proxy, None).await;
                if slot.cancel.is_cancelled() {
                    slot.finish(JobStatus::Cancelled, None);
                    return;
                }
                slot.finish(JobStatus::Completed, None);
                return;
            }
            Err(error) if error.is_retryable() && !slot.cancel.is_cancelled() => {
                engine.error_stats().increment(classify_step(&error));
                slot.push_error(error.to_string());
                engine.proxies().report_failure(&proxy).await;

                let retry = slot.bump_retry();
                if retry > JOB_MAX_RETRIES {
                    slot.finish(
                        JobStatus::Failed,
                        Some(JobError::RetriesExhausted(error.to_string())),
                    );
                    return;
                }
                log::warn!(
                    "job {}: retry {retry}/{JOB_MAX_RETRIES} after {error}",
                    slot.id
                );

                // Linear backoff, then rotate to a fresh proxy.
                let backoff = engine.retry_delay() * retry;
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = slot.cancel.cancelled() => {
                        slot.finish(JobStatus::Cancelled, None);
                        return;
                    }
                }
                proxy = match acquire_proxy(engine, slot).await {
                    Some(proxy) => proxy,
                    None => {
                        if slot.cancel.is_cancelled() {
                            slot.finish(JobStatus::Cancelled, None);
                        } else {
                            engine.error_stats().increment(ErrorKind::NoProxyAvailable);
                            slot.finish(JobStatus::Failed, Some(JobError::NoProxyAvailable));
                        }
                        return;
                    }
                };
                slot.set_proxy(proxy.key());
            }
            Err(error) => {
                if slot.cancel.is_cancelled() {
                    slot.finish(JobStatus::Cancelled, None);
                    return;
                }
                // Fatal step error. The proxy is neither credited nor
                // penalized; a malformed page says nothing about it.
                engine.error_stats().increment(classify_step(&error));
                slot.finish(JobStatus::Failed, Some(JobError::Fatal(error.to_string())));
                return;
            }
        }
    }
}

/// One search-and-scrape pass with the current proxy.
///
/// Search failures and block detection propagate so the retry loop can
/// rotate the proxy. Per-item failures (detail fetch, extraction, images,
/// persistence) are recorded on the job and skipped; one bad listing never
/// aborts the pass.
async fn run_pass(
    engine: &Engine,
    slot: &JobSlot,
    worker: &dyn PlatformWorker,
    ctx: &FetchContext<'_>,
    processed: &mut HashSet<String>,
) -> Result<(), StepError> {
    let params = &slot.params;
    let started = Instant::now();
    let urls = match worker
        .search(ctx, &params.query, &params.filters, params.max_items)
        .await
    {
        Ok(urls) => {
            engine.monitor().record(MonitorEvent::Request {
                latency: started.elapsed(),
                success: true,
            });
            urls
        }
        Err(error) => {
            engine.monitor().record(MonitorEvent::Request {
                latency: started.elapsed(),
                success: false,
            });
            return Err(error);
        }
    };

    for url in urls {
        if slot.items_scraped() >= params.max_items || slot.cancel.is_cancelled() {
            break;
        }
        if processed.contains(&url) {
            continue;
        }

        let started = Instant::now();
        let html = match worker.fetch_detail(ctx, &url).await {
            Ok(html) => {
                engine.monitor().record(MonitorEvent::Request {
                    latency: started.elapsed(),
                    success: true,
                });
                engine.monitor().record(MonitorEvent::Bytes {
                    count: html.len() as u64,
                });
                html
            }
            Err(error @ StepError::Blocked(_)) => {
                engine.monitor().record(MonitorEvent::Request {
                    latency: started.elapsed(),
                    success: false,
                });
                // The proxy is burned; hand the block up for rotation.
                return Err(error);
            }
            Err(error) => {
                engine.monitor().record(MonitorEvent::Request {
                    latency: started.elapsed(),
                    success: false,
                });
                engine.error_stats().increment(classify_step(&error));
                slot.push_error(format!("{url}: {error}"));
                continue;
            }
        };

        let item = match worker.extract_fields(&html, &url) {
            Ok(item) => item,
            Err(error) => {
                engine.error_stats().increment(ErrorKind::ExtractError);
                slot.push_error(format!("{url}: {error}"));
                processed.insert(url);
                continue;
            }
        };
        processed.insert(url);

        if !params.filters.price_matches(item.price_amount) {
            log::debug!("job {}: {} filtered out by price", slot.id, item.external_id);
            continue;
        }

        persist_item(engine, slot, item).await;
    }
    Ok(())
}

/// Routes one extracted item through image processing and storage.
/// Failures land on the job's error list; success advances progress.
async fn persist_item(engine: &Engine, slot: &JobSlot, item: RawItem) {
    let images = engine
        .images()
        .process(&item.image_urls, &item.external_id)
        .await;
    if images.bytes_fetched > 0 {
        engine.monitor().record(MonitorEvent::Bytes {
            count: images.bytes_fetched,
        });
    }
    for error in &images.errors {
        let kind = if error.contains("too small")
            || error.contains("too large")
            || error.contains("decode failed")
            || error.contains("not an image")
        {
            ErrorKind::ImageInvalid
        } else {
            ErrorKind::ImageDownloadError
        };
        engine.error_stats().increment(kind);
        slot.push_error(format!("{}: {error}", item.external_id));
    }

    let record = ProductRecord {
        id: None,
        external_id: item.external_id.clone(),
        platform: slot.params.platform.as_str().to_string(),
        title: item.title,
        price_amount: item.price_amount,
        price_currency: item.price_currency,
        description: item.description,
        category: item.category,
        brand: item.brand,
        product_url: item.product_url,
        image_paths: images
            .results
            .iter()
            .map(|r| r.path.display().to_string())
            .collect(),
        primary_image: images
            .results
            .iter()
            .find(|r| r.primary)
            .map(|r| r.path.display().to_string()),
        scraped_at: Utc::now(),
    };

    match engine.storage().insert(&record).await {
        Ok(record_id) => {
            slot.record_item(record_id);
            engine.monitor().record(MonitorEvent::Items { count: 1 });
            log::info!(
                "job {}: persisted {} ({}/{})",
                slot.id,
                record.external_id,
                slot.items_scraped(),
                slot.params.max_items
            );
        }
        Err(error) => {
            engine.error_stats().increment(ErrorKind::StorageError);
            slot.push_error(format!("{}: {error}", item.external_id));
        }
    }
}

/// Polls the pool a bounded number of times before giving up. Returns
/// `None` on exhaustion or cancellation; the caller distinguishes the two
/// via the token.
async fn acquire_proxy(engine: &Engine, slot: &JobSlot) -> Option<ProxyHandle> {
    for attempt in 1..=PROXY_ACQUIRE_ATTEMPTS {
        if slot.cancel.is_cancelled() {
            return None;
        }
        if let Some(handle) = engine.proxies().acquire().await {
            return Some(handle);
        }
        if attempt < PROXY_ACQUIRE_ATTEMPTS {
            log::debug!(
                "job {}: no proxy available, attempt {attempt}/{PROXY_ACQUIRE_ATTEMPTS}",
                slot.id
            );
            tokio::select! {
                _ = tokio::time::sleep(PROXY_ACQUIRE_DELAY) => {}
                _ = slot.cancel.cancelled() => return None,
            }
        }
    }
    None
}

/// Maps a step error onto the statistics category it represents.
fn classify_step(error: &StepError) -> ErrorKind {
    match error {
        StepError::Blocked(_) => ErrorKind::BlockDetected,
        StepError::Retryable(message) => {
            let message = message.to_lowercase();
            if message.contains("429") {
                ErrorKind::RateLimited
            } else if message.contains("http 5") {
                ErrorKind::ServerError
            } else if message.contains("timed out") || message.contains("timeout") {
                ErrorKind::FetchTimeout
            } else {
                ErrorKind::ConnectError
            }
        }
        StepError::Fatal(_) => ErrorKind::ExtractError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_step_errors() {
        assert_eq!(
            classify_step(&StepError::Blocked("captcha".into())),
            ErrorKind::BlockDetected
        );
        assert_eq!(
            classify_step(&StepError::Retryable("HTTP 429 for x".into())),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_step(&StepError::Retryable("HTTP 503 for x".into())),
            ErrorKind::ServerError
        );
        assert_eq!(
            classify_step(&StepError::Retryable("operation timed out".into())),
            ErrorKind::FetchTimeout
        );
        assert_eq!(
            classify_step(&StepError::Retryable("connection refused".into())),
            ErrorKind::ConnectError
        );
        assert_eq!(
            classify_step(&StepError::Fatal("no title".into())),
            ErrorKind::ExtractError
        );
    }
}
