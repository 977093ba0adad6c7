//! Proxy pool with health scoring and eviction.

use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

use super::handle::{ProxyConfig, ProxyHandle};
use crate::config::{
    PROXY_CONSECUTIVE_FAILURE_CEILING, PROXY_HEALTH_FLOOR, PROXY_MIN_REUSE_INTERVAL,
    PROXY_PROBE_TIMEOUT, PROXY_PROBE_URL,
};
use crate::error::ProxyConfigError;

/// Assumed latency for a handle that has never completed a request.
const UNMEASURED_LATENCY: Duration = Duration::from_millis(500);
/// Guard against division by zero when scoring a zero-latency handle.
const LATENCY_EPSILON: f64 = 0.001;

/// Pool-internal telemetry for one proxy.
struct PoolEntry {
    config: ProxyConfig,
    last_used: Option<Instant>,
    success_count: u32,
    failure_count: u32,
    consecutive_failures: u32,
    latency: Option<Duration>,
}

impl PoolEntry {
    fn new(config: ProxyConfig) -> Self {
        PoolEntry {
            config,
            last_used: None,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            latency: None,
        }
    }

    /// Success ratio in [0, 1]; 0.5 with no history.
    fn health_score(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.5;
        }
        f64::from(self.success_count) / f64::from(total)
    }

    /// Selection score favoring healthy and fast handles.
    fn selection_score(&self) -> f64 {
        let latency_secs = self.latency.unwrap_or(UNMEASURED_LATENCY).as_secs_f64();
        self.health_score() / (latency_secs + LATENCY_EPSILON)
    }
}

/// Read-only telemetry snapshot for one pool member.
#[derive(Debug, Clone)]
pub struct ProxyStats {
    pub key: String,
    pub health_score: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub latency: Option<Duration>,
}

/// Shared pool of outbound identities.
///
/// Loaded once at startup; mutated by every job task through success/failure
/// reports. Handles falling below the health floor or exceeding the
/// consecutive-failure ceiling are evicted and never handed out again.
pub struct ProxyPool {
    entries: Mutex<Vec<PoolEntry>>,
    min_reuse_interval: Duration,
}

impl ProxyPool {
    /// Builds a pool from explicit configurations.
    pub fn new(configs: Vec<ProxyConfig>) -> Self {
        Self::with_reuse_interval(configs, PROXY_MIN_REUSE_INTERVAL)
    }

    /// Builds a pool with a custom minimum reuse interval (tests use zero).
    pub fn with_reuse_interval(configs: Vec<ProxyConfig>, min_reuse_interval: Duration) -> Self {
        ProxyPool {
            entries: Mutex::new(configs.into_iter().map(PoolEntry::new).collect()),
            min_reuse_interval,
        }
    }

    /// Loads the pool from a JSON proxy list file.
    pub fn from_file(path: &Path) -> Result<Self, ProxyConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let configs: Vec<ProxyConfig> = serde_json::from_str(&raw)?;
        log::info!("Loaded {} proxies from {}", configs.len(), path.display());
        Ok(Self::new(configs))
    }

    /// Selects a proxy for use, or `None` if no candidate qualifies.
    ///
    /// Candidates must have a health score at or above the floor and must
    /// not have been handed out within the minimum reuse interval. Among
    /// those, the handle maximizing `health / (latency + ε)` wins; near-ties
    /// are broken randomly so traffic doesn't converge on one egress IP.
    ///
    /// Callers receiving `None` must back off before retrying, not spin.
    pub async fn acquire(&self) -> Option<ProxyHandle> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let candidates: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.health_score() >= PROXY_HEALTH_FLOOR)
            .filter(|(_, e)| {
                e.last_used
                    .map(|t| now.duration_since(t) >= self.min_reuse_interval)
                    .unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let best = candidates
            .iter()
            .map(|&i| entries[i].selection_score())
            .fold(f64::MIN, f64::max);
        let top: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| entries[i].selection_score() >= best - f64::EPSILON)
            .collect();
        let chosen = top[rand::rng().random_range(0..top.len())];

        entries[chosen].last_used = Some(now);
        Some(ProxyHandle::new(entries[chosen].config.clone()))
    }

    /// Records a successful use of `handle`, optionally with the observed
    /// request latency.
    pub async fn report_success(&self, handle: &ProxyHandle, latency: Option<Duration>) {
        let mut entries = self.entries.lock().await;
        let key = handle.key();
        if let Some(entry) = entries.iter_mut().find(|e| e.config.key() == key) {
            entry.success_count += 1;
            entry.consecutive_failures = 0;
            entry.last_used = Some(Instant::now());
            if let Some(latency) = latency {
                entry.latency = Some(latency);
            }
        }
    }

    /// Records a failed use of `handle`. Crossing the health floor or the
    /// consecutive-failure ceiling evicts the handle immediately.
    pub async fn report_failure(&self, handle: &ProxyHandle) {
        let mut entries = self.entries.lock().await;
        let key = handle.key();
        let Some(pos) = entries.iter().position(|e| e.config.key() == key) else {
            return;
        };
        let entry = &mut entries[pos];
        entry.failure_count += 1;
        entry.consecutive_failures += 1;

        if entry.health_score() < PROXY_HEALTH_FLOOR
            || entry.consecutive_failures >= PROXY_CONSECUTIVE_FAILURE_CEILING
        {
            log::info!(
                "Evicting proxy {key} (health {:.2}, {} consecutive failures)",
                entry.health_score(),
                entry.consecutive_failures
            );
            entries.remove(pos);
        }
    }

    /// Probes every pool member concurrently and evicts non-responders.
    ///
    /// Intended to run on a timer, not per job. Responders get a success
    /// report with the measured latency; non-responders are removed.
    pub async fn verify_all(&self) {
        let configs: Vec<ProxyConfig> = {
            let entries = self.entries.lock().await;
            entries.iter().map(|e| e.config.clone()).collect()
        };
        if configs.is_empty() {
            return;
        }

        let probes = configs.into_iter().map(|config| async move {
            let latency = probe_proxy(&config).await;
            (config, latency)
        });
        let results = futures::future::join_all(probes).await;

        let mut entries = self.entries.lock().await;
        for (config, latency) in results {
            let key = config.key();
            match latency {
                Some(latency) => {
                    if let Some(entry) = entries.iter_mut().find(|e| e.config.key() == key) {
                        entry.success_count += 1;
                        entry.consecutive_failures = 0;
                        entry.latency = Some(latency);
                    }
                }
                None => {
                    if let Some(pos) = entries.iter().position(|e| e.config.key() == key) {
                        log::info!("Evicting unresponsive proxy {key}");
                        entries.remove(pos);
                    }
                }
            }
        }
        log::info!("Proxy verification complete, {} members remain", entries.len());
    }

    /// Number of handles currently in the pool.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Telemetry snapshot for every pool member.
    pub async fn stats(&self) -> Vec<ProxyStats> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|e| ProxyStats {
                key: e.config.key(),
                health_score: e.health_score(),
                success_count: e.success_count,
                failure_count: e.failure_count,
                latency: e.latency,
            })
            .collect()
    }
}

/// Issues a lightweight connectivity probe through one proxy, returning the
/// observed latency on success.
async fn probe_proxy(config: &ProxyConfig) -> Option<Duration> {
    let proxy = reqwest::Proxy::all(config.url()).ok()?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(PROXY_PROBE_TIMEOUT)
        .build()
        .ok()?;
    let start = Instant::now();
    match client.get(PROXY_PROBE_URL).send().await {
        Ok(response) if response.status().is_success() => Some(start.elapsed()),
        Ok(_) | Err(_) => None,
    }
}
