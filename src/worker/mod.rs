//! Platform-specific fetch and extraction workers.
//!
//! Each supported marketplace implements [`PlatformWorker`]: search for
//! candidate detail-page URLs, fetch one detail page, extract structured
//! fields. All network I/O goes through a [`FetchContext`], which applies
//! the rate limiter and the job's assigned proxy. Dispatch is a closed
//! match over [`Platform`].

mod amazon;
mod context;
mod ebay;
mod price;
mod types;

pub use context::FetchContext;
pub use price::parse_price;
pub use types::{Platform, RawItem, ScrapeFilters};

use async_trait::async_trait;

use crate::error::StepError;

/// Site-specific scraping capability for one marketplace.
///
/// Implementations are stateless; the [`FetchContext`] carries the
/// per-job proxy and pacing state.
#[async_trait]
pub trait PlatformWorker: Send + Sync {
    fn platform(&self) -> Platform;

    /// Runs one search pass and returns candidate detail-page URLs,
    /// deduplicated, at most `2 * max_items` so per-item failures can
    /// still fill the quota.
    async fn search(
        &self,
        ctx: &FetchContext<'_>,
        query: &str,
        filters: &ScrapeFilters,
        max_items: usize,
    ) -> Result<Vec<String>, StepError>;

    /// Fetches one detail page.
    async fn fetch_detail(&self, ctx: &FetchContext<'_>, url: &str) -> Result<String, StepError> {
        ctx.fetch(url).await
    }

    /// Extracts structured fields from a fetched detail page.
    fn extract_fields(&self, html: &str, url: &str) -> Result<RawItem, StepError>;
}

/// Returns the worker for a platform.
pub fn worker_for(platform: Platform) -> &'static dyn PlatformWorker {
    match platform {
        Platform::Ebay => &ebay::EbayWorker,
        Platform::Amazon => &amazon::AmazonWorker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_registry_covers_every_platform() {
        for platform in Platform::iter() {
            assert_eq!(worker_for(platform).platform(), platform);
        }
    }
}
