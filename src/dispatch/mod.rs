//! Request dispatcher
//!
//! Runs one logical request through the `Selecting -> Sending ->
//! (Success | Retrying | Exhausted)` state machine: admit a key through
//! the rate limiter, bind an optional proxy, issue the upstream call under
//! a per-attempt timeout, classify the outcome, report it to the pools,
//! and retry recoverable failures with a different key. A key is never
//! reused within one logical request. Dropping the future returned by
//! [`Dispatcher::dispatch`] cancels the in-flight attempt and abandons any
//! pending retries.

mod upstream;

pub use upstream::{HttpUpstream, Upstream, UpstreamConfig, UpstreamRequest, UpstreamResponse};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, RotorError};
use crate::keys::{Admission, KeyHandle, KeyPool, RateLimiter};
use crate::models::{AttemptOutcome, AttemptRecord, FailureKind};
use crate::proxies::{ProxyHandle, ProxyOutcome, ProxyPool};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Extra attempts after the first (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Timeout applied to each attempt
    pub attempt_timeout: Duration,
    /// Whether attempts go through the proxy pool
    pub proxy_enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(30),
            proxy_enabled: false,
        }
    }
}

/// Final result of a successful dispatch
#[derive(Debug)]
pub struct DispatchOutcome {
    pub request_id: Uuid,
    pub response: UpstreamResponse,
    /// Total attempts issued, including the successful one
    pub attempts: u32,
}

enum Candidate {
    Key(KeyHandle),
    /// Active keys exist but every one was already tried in this request
    AllTried,
    AllThrottled(Duration),
    NoneActive,
}

/// Orchestrates one logical request over the shared pools
pub struct Dispatcher {
    keys: Arc<KeyPool>,
    proxies: Arc<ProxyPool>,
    limiter: Arc<RateLimiter>,
    upstream: Arc<dyn Upstream>,
    config: DispatchConfig,
    record_tx: Option<broadcast::Sender<AttemptRecord>>,
}

impl Dispatcher {
    pub fn new(
        keys: Arc<KeyPool>,
        proxies: Arc<ProxyPool>,
        limiter: Arc<RateLimiter>,
        upstream: Arc<dyn Upstream>,
        config: DispatchConfig,
        record_tx: Option<broadcast::Sender<AttemptRecord>>,
    ) -> Self {
        Self {
            keys,
            proxies,
            limiter,
            upstream,
            config,
            record_tx,
        }
    }

    /// Run one logical request to completion.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: UpstreamRequest) -> Result<DispatchOutcome> {
        let request_id = Uuid::new_v4();
        let max_attempts = self.config.max_retries + 1;
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0u32;
        let mut last_error: Option<RotorError> = None;

        while attempts < max_attempts {
            // Selecting
            let key = match self.next_candidate(&tried) {
                Candidate::Key(key) => key,
                Candidate::AllThrottled(retry_after) => {
                    return Err(RotorError::AllThrottled { retry_after })
                }
                Candidate::NoneActive if attempts == 0 => {
                    return Err(RotorError::NoKeysAvailable)
                }
                // Nothing left to rotate onto; repeating the identical
                // request against a credential that just rejected it
                // cannot succeed.
                Candidate::NoneActive | Candidate::AllTried => break,
            };

            let proxy = self.select_proxy()?;

            // Sending
            attempts += 1;
            let start = Instant::now();
            let send = self
                .upstream
                .send(&request, key.key(), proxy.as_ref().map(|p| p.url()));
            let outcome = match tokio::time::timeout(self.config.attempt_timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(RotorError::Timeout),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) if response.is_success() => {
                    self.keys.report_success(key.key());
                    if let Some(p) = &proxy {
                        self.proxies
                            .report_outcome(p.id(), ProxyOutcome::Success { latency_ms });
                    }
                    self.emit(
                        request_id,
                        attempts,
                        &key,
                        proxy.as_ref(),
                        AttemptOutcome::Success {
                            status: response.status,
                        },
                        latency_ms,
                    );
                    debug!(attempts, status = response.status, "dispatch succeeded");
                    return Ok(DispatchOutcome {
                        request_id,
                        response,
                        attempts,
                    });
                }
                Ok(response) => {
                    let error = classify_status(response.status);
                    self.record_failure(
                        request_id, attempts, &key, proxy.as_ref(), &error, latency_ms,
                    );
                    tried.insert(key.key().to_string());
                    last_error = Some(error);
                }
                Err(error) => {
                    self.record_failure(
                        request_id, attempts, &key, proxy.as_ref(), &error, latency_ms,
                    );
                    tried.insert(key.key().to_string());
                    last_error = Some(error);
                }
            }
        }

        let source = last_error.unwrap_or(RotorError::NoKeysAvailable);
        warn!(attempts, error = %source, "dispatch exhausted");
        Err(RotorError::Exhausted {
            attempts,
            source: Box::new(source),
        })
    }

    /// Find the next admissible key: rotate through the pool, skipping
    /// keys already tried in this request, probing the rate limiter for
    /// each. Gives up after inspecting one full pool window.
    fn next_candidate(&self, tried: &HashSet<String>) -> Candidate {
        let len = self.keys.len();
        if len == 0 {
            return Candidate::NoneActive;
        }

        let mut min_retry: Option<Duration> = None;
        for _ in 0..len {
            let slot = match self.keys.select() {
                Ok(slot) => slot,
                Err(_) => return Candidate::NoneActive,
            };
            if tried.contains(slot.key()) {
                continue;
            }
            match self.limiter.try_acquire(slot.key()) {
                Admission::Admitted => return Candidate::Key(slot),
                Admission::Throttled { retry_after } => {
                    min_retry = Some(min_retry.map_or(retry_after, |m| m.min(retry_after)));
                }
            }
        }

        match min_retry {
            Some(retry_after) => Candidate::AllThrottled(retry_after),
            None => Candidate::AllTried,
        }
    }

    fn select_proxy(&self) -> Result<Option<ProxyHandle>> {
        if !self.config.proxy_enabled {
            return Ok(None);
        }
        self.proxies.select_healthy()
    }

    fn record_failure(
        &self,
        request_id: Uuid,
        attempt: u32,
        key: &KeyHandle,
        proxy: Option<&ProxyHandle>,
        error: &RotorError,
        latency_ms: u64,
    ) {
        let kind = match error {
            RotorError::CredentialInvalid { .. } => FailureKind::CredentialInvalid,
            RotorError::Network(_) if proxy.is_some() => FailureKind::Proxy,
            _ => FailureKind::Transient,
        };
        self.keys.report_failure(key.key(), kind);

        // Only network-layer failures are charged to the proxy; a timeout
        // or an upstream status says nothing about the proxy hop.
        if let Some(p) = proxy {
            if error.is_network() {
                self.proxies.report_outcome(
                    p.id(),
                    ProxyOutcome::Failure {
                        error: error.to_string(),
                    },
                );
            }
        }

        let outcome = match error {
            RotorError::Timeout => AttemptOutcome::Timeout,
            RotorError::Network(message) => AttemptOutcome::NetworkError {
                message: message.clone(),
            },
            RotorError::CredentialInvalid { status }
            | RotorError::UpstreamStatus { status } => {
                AttemptOutcome::UpstreamError { status: *status }
            }
            other => AttemptOutcome::NetworkError {
                message: other.to_string(),
            },
        };
        warn!(
            attempt,
            key = %key.redacted(),
            error = %error,
            "attempt failed"
        );
        self.emit(request_id, attempt, key, proxy, outcome, latency_ms);
    }

    fn emit(
        &self,
        request_id: Uuid,
        attempt: u32,
        key: &KeyHandle,
        proxy: Option<&ProxyHandle>,
        outcome: AttemptOutcome,
        latency_ms: u64,
    ) {
        let Some(tx) = &self.record_tx else { return };
        let _ = tx.send(AttemptRecord {
            request_id,
            attempt,
            key: key.redacted(),
            proxy_id: proxy.map(|p| p.id()),
            proxy_address: proxy.map(|p| p.address()),
            outcome,
            latency_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Map a non-success upstream status to its failure class.
fn classify_status(status: u16) -> RotorError {
    match status {
        401 | 403 => RotorError::CredentialInvalid { status },
        _ => RotorError::UpstreamStatus { status },
    }
}
