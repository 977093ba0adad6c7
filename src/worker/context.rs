//! Shared fetch plumbing for platform workers.
//!
//! Every network request a worker makes goes through a [`FetchContext`]:
//! it waits on the rate limiter, routes the request through the job's
//! assigned proxy, classifies failures into [`StepError`] tags, and feeds
//! the outcome back into the limiter's adaptive delay.

use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::FETCH_TIMEOUT;
use crate::error::StepError;
use crate::proxy::ProxyHandle;
use crate::rate_limit::RateLimiter;

/// Body markers that identify an anti-automation challenge page served
/// with a 200 status.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "robot check",
    "verify you are a human",
    "unusual traffic",
    "access denied",
];

/// Proxied, rate-limited HTTP fetcher bound to one job's proxy and target.
pub struct FetchContext<'a> {
    client: Client,
    rate_limiter: &'a RateLimiter,
    target: String,
    cancel: CancellationToken,
}

impl<'a> FetchContext<'a> {
    /// Builds a context whose requests all egress through `proxy`.
    pub fn new(
        proxy: &ProxyHandle,
        user_agent: &str,
        rate_limiter: &'a RateLimiter,
        target: String,
        cancel: CancellationToken,
    ) -> Result<Self, StepError> {
        let proxy = reqwest::Proxy::all(proxy.url())
            .map_err(|e| StepError::Fatal(format!("invalid proxy url: {e}")))?;
        let client = Client::builder()
            .proxy(proxy)
            .user_agent(user_agent)
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StepError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(FetchContext {
            client,
            rate_limiter,
            target,
            cancel,
        })
    }

    /// Target key used for rate limiting, the platform name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Fetches one page: waits for rate-limit capacity, issues the GET
    /// through the proxy, and classifies the response.
    ///
    /// Challenge pages are recognized both by status (403) and by body
    /// markers on a 200, and surface as [`StepError::Blocked`] so the
    /// controller rotates the proxy instead of treating them as ordinary
    /// failures.
    pub async fn fetch(&self, url: &str) -> Result<String, StepError> {
        let granted = self
            .rate_limiter
            .wait_cancellable(&self.target, &self.cancel)
            .await;
        if !granted {
            // Cancellation observed while waiting; the controller checks
            // the token and will not retry this.
            return Err(StepError::Retryable("cancelled during rate wait".into()));
        }

        log::debug!("fetching {url} via {}", self.target);
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.rate_limiter.report_outcome(&self.target, false).await;
                return Err(StepError::from_reqwest(&e));
            }
        };

        let status = response.status();
        if status.as_u16() == 403 {
            self.rate_limiter.report_outcome(&self.target, false).await;
            return Err(StepError::Blocked(format!("HTTP 403 for {url}")));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            self.rate_limiter.report_outcome(&self.target, false).await;
            return Err(StepError::Retryable(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            self.rate_limiter.report_outcome(&self.target, false).await;
            return Err(StepError::Fatal(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.rate_limiter.report_outcome(&self.target, false).await;
                return Err(StepError::from_reqwest(&e));
            }
        };

        if detect_block(&body) {
            self.rate_limiter.report_outcome(&self.target, false).await;
            return Err(StepError::Blocked(format!(
                "challenge page served for {url}"
            )));
        }

        self.rate_limiter.report_outcome(&self.target, true).await;
        Ok(body)
    }
}

/// Whether a response body looks like an anti-automation challenge page.
fn detect_block(body: &str) -> bool {
    // Challenge pages are small; cap the scan so multi-megabyte product
    // pages mentioning "captcha" in a review are not misclassified.
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| head.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_block_markers() {
        assert!(detect_block("<html><body>Please complete this CAPTCHA</body></html>"));
        assert!(detect_block("<title>Robot Check</title>"));
        assert!(!detect_block("<html><body>Gold ring, 14k</body></html>"));
    }

    #[test]
    fn test_detect_block_ignores_deep_body_text() {
        let mut body = "<html><body>".to_string();
        body.push_str(&"listing text ".repeat(1000));
        body.push_str("captcha</body></html>");
        assert!(!detect_block(&body));
    }
}
