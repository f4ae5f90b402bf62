//! Proxy pool
//!
//! Owns all proxy entries and their health state. Membership changes build
//! a fresh snapshot and swap it atomically, so concurrent dispatches keep
//! working against the entries they captured; per-entry state sits behind
//! its own lock and never requires a pool-wide lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{Result, RotorError};
use crate::models::{ProbeResult, ProxyDescriptor, ProxyInfo, ProxyStatus};
use crate::proxies::parser::{self, RejectedLine};

/// Latency bucket width for selection ranking, in milliseconds.
///
/// Entries within one bucket are considered equally ranked and tie-break
/// on least-recently-used so load spreads instead of hammering the single
/// fastest proxy.
const LATENCY_BUCKET_MS: u64 = 50;

/// Real-traffic outcome reported back by the dispatcher
#[derive(Debug, Clone)]
pub enum ProxyOutcome {
    Success { latency_ms: u64 },
    Failure { error: String },
}

#[derive(Debug)]
struct SlotState {
    status: ProxyStatus,
    latency_ms: Option<u64>,
    consecutive_failures: u32,
    last_checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_used: Option<Instant>,
}

/// One pool entry. Handed out as `Arc<ProxySlot>`; a removed entry stays
/// alive for any dispatch that already captured it.
#[derive(Debug)]
pub struct ProxySlot {
    id: u64,
    descriptor: ProxyDescriptor,
    url: String,
    state: Mutex<SlotState>,
}

pub type ProxyHandle = Arc<ProxySlot>;

impl ProxySlot {
    fn new(id: u64, descriptor: ProxyDescriptor) -> Self {
        let url = parser::connection_url(&descriptor);
        Self {
            id,
            descriptor,
            url,
            state: Mutex::new(SlotState {
                status: ProxyStatus::Untested,
                latency_ms: None,
                consecutive_failures: 0,
                last_checked_at: None,
                last_error: None,
                last_used: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `ip:port`, safe to log.
    pub fn address(&self) -> String {
        self.descriptor.address()
    }

    /// Connection URL carrying credentials. Not for logs.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn descriptor(&self) -> &ProxyDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> ProxyStatus {
        self.state.lock().status
    }

    fn info(&self) -> ProxyInfo {
        let state = self.state.lock();
        ProxyInfo {
            id: self.id,
            address: self.descriptor.address(),
            status: state.status,
            latency_ms: state.latency_ms,
            consecutive_failures: state.consecutive_failures,
            last_checked_at: state.last_checked_at,
            last_error: state.last_error.clone(),
        }
    }
}

/// Result of an administrative batch add
#[derive(Debug, Serialize)]
pub struct AddReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedLine>,
}

/// Registry of proxy entries with health tracking and selection
pub struct ProxyPool {
    slots: ArcSwap<Vec<ProxyHandle>>,
    next_id: AtomicU64,
    /// Serializes membership changes; readers never take it.
    admin: Mutex<()>,
    clock: SharedClock,
    max_failures: u32,
}

impl ProxyPool {
    /// Create an empty pool. `max_failures` is the consecutive real-traffic
    /// failure count that forces an entry Inactive between checks.
    pub fn new(clock: SharedClock, max_failures: u32) -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            admin: Mutex::new(()),
            clock,
            max_failures: max_failures.max(1),
        }
    }

    /// Parse a newline-delimited descriptor block and insert the valid
    /// entries. Duplicates, within the block or against existing entries,
    /// are silently collapsed.
    pub fn add(&self, text: &str) -> AddReport {
        let parsed = parser::parse_batch(text);

        let _guard = self.admin.lock();
        let current = self.slots.load_full();
        let existing: std::collections::HashSet<String> =
            current.iter().map(|s| s.descriptor.to_line()).collect();

        let mut next: Vec<ProxyHandle> = current.as_ref().clone();
        let mut accepted = 0;
        for desc in parsed.accepted {
            if existing.contains(&desc.to_line()) {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            next.push(Arc::new(ProxySlot::new(id, desc)));
            accepted += 1;
        }
        self.slots.store(Arc::new(next));

        info!(
            accepted,
            rejected = parsed.rejected.len(),
            "proxy batch processed"
        );
        AddReport {
            accepted,
            rejected: parsed.rejected,
        }
    }

    /// Remove an entry by id. An in-flight dispatch bound to the entry
    /// completes with the handle it captured.
    pub fn remove(&self, id: u64) -> Result<()> {
        let _guard = self.admin.lock();
        let current = self.slots.load_full();
        let next: Vec<ProxyHandle> = current
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        if next.len() == current.len() {
            return Err(RotorError::ProxyNotFound { id });
        }
        self.slots.store(Arc::new(next));
        info!(proxy_id = id, "proxy removed");
        Ok(())
    }

    /// Snapshot of all entries for monitoring.
    pub fn list(&self) -> Vec<ProxyInfo> {
        self.slots.load().iter().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.load().is_empty()
    }

    pub fn get(&self, id: u64) -> Result<ProxyHandle> {
        self.slots
            .load()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(RotorError::ProxyNotFound { id })
    }

    /// Select one usable entry.
    ///
    /// `Ok(None)` means the pool is empty and the caller should go direct.
    /// Entries are ranked by latency bucket; untested entries rank in the
    /// best bucket so they get tried and reclassified instead of starving.
    pub fn select_healthy(&self) -> Result<Option<ProxyHandle>> {
        let slots = self.slots.load();
        if slots.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let mut best: Option<(u64, Option<Instant>, ProxyHandle)> = None;
        for slot in slots.iter() {
            let state = slot.state.lock();
            if !state.status.is_selectable() {
                continue;
            }
            let bucket = state
                .latency_ms
                .map(|ms| ms / LATENCY_BUCKET_MS)
                .unwrap_or(0);
            let candidate = (bucket, state.last_used);
            drop(state);

            let better = match &best {
                None => true,
                // None last_used sorts first within a bucket.
                Some((b, used, _)) => candidate < (*b, *used),
            };
            if better {
                best = Some((candidate.0, candidate.1, slot.clone()));
            }
        }

        match best {
            Some((_, _, slot)) => {
                slot.state.lock().last_used = Some(now);
                debug!(proxy_id = slot.id, address = %slot.address(), "proxy selected");
                Ok(Some(slot))
            }
            None => Err(RotorError::NoHealthyProxy),
        }
    }

    /// Record a real-traffic outcome for an entry.
    ///
    /// An entry that keeps failing under live traffic goes Inactive even if
    /// its last explicit check passed; degradation between checks is caught
    /// here rather than by the probe schedule.
    pub fn report_outcome(&self, id: u64, outcome: ProxyOutcome) {
        let Ok(slot) = self.get(id) else {
            // Entry was removed while the attempt was in flight.
            return;
        };

        let mut state = slot.state.lock();
        match outcome {
            ProxyOutcome::Success { latency_ms } => {
                state.status = ProxyStatus::Active;
                state.latency_ms = Some(latency_ms);
                state.consecutive_failures = 0;
                state.last_error = None;
            }
            ProxyOutcome::Failure { error } => {
                state.consecutive_failures += 1;
                state.last_error = Some(error);
                if state.consecutive_failures >= self.max_failures {
                    if state.status != ProxyStatus::Inactive {
                        warn!(
                            proxy_id = id,
                            failures = state.consecutive_failures,
                            "proxy deactivated after repeated traffic failures"
                        );
                    }
                    state.status = ProxyStatus::Inactive;
                }
            }
        }
    }

    /// Apply the classification of an explicit health probe.
    pub fn apply_probe(&self, id: u64, probe: &ProbeResult) -> Result<()> {
        let slot = self.get(id)?;
        let mut state = slot.state.lock();
        state.status = probe.status;
        state.latency_ms = Some(probe.latency_ms);
        state.last_error = probe.error.clone();
        state.last_checked_at = Some(Utc::now());
        if probe.is_healthy() {
            state.consecutive_failures = 0;
        }
        Ok(())
    }
}
