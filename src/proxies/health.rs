//! Health checking for pool proxies
//!
//! A probe is a single GET against a configurable target URL issued
//! through the proxy under test. The probe itself mutates nothing; the
//! sweep runner and the administrative test operation apply its result to
//! the pool. Probes run concurrently with live dispatch and never block it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::ProbeResult;
use crate::proxies::ProxyPool;

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// URL fetched through each proxy
    pub target_url: String,
    /// Interval between sweep rounds
    pub interval: Duration,
    /// Timeout for each probe
    pub timeout: Duration,
    /// Concurrent probes per sweep
    pub workers: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            target_url: "http://www.gstatic.com/generate_204".to_string(),
            interval: Duration::from_secs(300),
            timeout: Duration::from_secs(10),
            workers: 10,
        }
    }
}

/// Probe one proxy: fetch the target through it and classify the outcome.
///
/// Pure function of (proxy URL, target, timeout); applies nothing to any
/// pool. HTTP success maps to Active, everything else to Inactive with the
/// error captured.
pub async fn probe(proxy_url: &str, target: &str, probe_timeout: Duration) -> ProbeResult {
    let start = Instant::now();

    let client = match reqwest::Proxy::all(proxy_url)
        .and_then(|proxy| reqwest::Client::builder().proxy(proxy).build())
    {
        Ok(client) => client,
        Err(e) => {
            return ProbeResult::unhealthy(
                start.elapsed().as_millis() as u64,
                format!("client build failed: {e}"),
            )
        }
    };

    match timeout(probe_timeout, client.get(target).send()).await {
        Ok(Ok(response)) => {
            let latency = start.elapsed().as_millis() as u64;
            if response.status().is_success() {
                ProbeResult::healthy(latency)
            } else {
                ProbeResult::unhealthy(latency, format!("HTTP status {}", response.status()))
            }
        }
        Ok(Err(e)) => ProbeResult::unhealthy(start.elapsed().as_millis() as u64, e.to_string()),
        Err(_) => ProbeResult::unhealthy(
            probe_timeout.as_millis() as u64,
            "probe timed out".to_string(),
        ),
    }
}

/// Scheduled health checker over a [`ProxyPool`]
pub struct HealthChecker {
    pool: Arc<ProxyPool>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(pool: Arc<ProxyPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Probe a single entry on demand and apply the result.
    ///
    /// Backs the administrative "test proxy" operation.
    #[instrument(skip(self))]
    pub async fn check_entry(&self, id: u64) -> Result<ProbeResult> {
        let slot = self.pool.get(id)?;
        let result = probe(slot.url(), &self.config.target_url, self.config.timeout).await;
        self.pool.apply_probe(id, &result)?;
        Ok(result)
    }

    /// Run periodic sweeps until shutdown (call in a spawned task).
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "starting proxy health checker"
        );

        let mut tick = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every entry with bounded concurrency and apply the results.
    async fn sweep(&self) {
        let entries = self.pool.list();
        if entries.is_empty() {
            return;
        }
        debug!(count = entries.len(), "sweeping proxy pool");

        let results = futures::stream::iter(entries)
            .map(|entry| async move {
                let result = match self.pool.get(entry.id) {
                    Ok(slot) => {
                        probe(slot.url(), &self.config.target_url, self.config.timeout).await
                    }
                    // Removed mid-sweep; nothing to record.
                    Err(_) => return None,
                };
                if let Err(e) = self.pool.apply_probe(entry.id, &result) {
                    warn!(proxy_id = entry.id, error = %e, "failed to record probe");
                }
                Some(result.is_healthy())
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let healthy = results.iter().filter(|r| **r == Some(true)).count();
        info!(
            healthy,
            unhealthy = results.len().saturating_sub(healthy),
            "health sweep complete"
        );
    }
}

/// Guard for managing health checker lifecycle
pub struct HealthCheckerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthCheckerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthCheckerHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unreachable_proxy_is_inactive() {
        // Reserved TEST-NET address; the connect fails fast or times out.
        let result = probe(
            "http://u:p@192.0.2.1:9",
            "http://example.com",
            Duration::from_millis(200),
        )
        .await;
        assert!(!result.is_healthy());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_invalid_proxy_url_is_inactive() {
        let result = probe("not a url", "http://example.com", Duration::from_secs(1)).await;
        assert!(!result.is_healthy());
        assert!(result
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("client build failed"));
    }

    #[test]
    fn test_handle_signals_shutdown() {
        let (handle, rx) = HealthCheckerHandle::new();
        assert!(!*rx.borrow());
        handle.shutdown();
        assert!(*rx.borrow());
    }
}
