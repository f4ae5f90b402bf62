//! API key pool
//!
//! Round-robin rotation over an insertion-ordered snapshot. The cursor is a
//! single atomic increment, so over any window of N selections with N
//! active keys every key is handed out exactly once. Cooldown expiry is
//! evaluated lazily at selection time from the injected clock; there is no
//! background timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{Result, RotorError};
use crate::models::{redact_key, FailureKind, KeyStatus, KeySummary};

/// Key health thresholds
#[derive(Debug, Clone)]
pub struct KeyPoolConfig {
    /// Consecutive transient failures before a key enters cooldown
    pub max_failures: u32,
    /// How long a cooled-down key stays out of rotation
    pub cooldown: Duration,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct KeyState {
    status: KeyStatus,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    last_used_at: Option<DateTime<Utc>>,
    last_checked_at: Option<DateTime<Utc>>,
}

/// One credential slot. Handed out as `Arc<KeySlot>`; removal swaps the
/// snapshot, so an in-flight dispatch keeps the slot it captured.
#[derive(Debug)]
pub struct KeySlot {
    key: String,
    state: Mutex<KeyState>,
}

pub type KeyHandle = Arc<KeySlot>;

impl KeySlot {
    fn new(key: String) -> Self {
        Self {
            key,
            state: Mutex::new(KeyState {
                status: KeyStatus::Active,
                consecutive_failures: 0,
                cooldown_until: None,
                last_used_at: None,
                last_checked_at: None,
            }),
        }
    }

    /// The credential value. Not for logs; use [`KeySlot::redacted`].
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn redacted(&self) -> String {
        redact_key(&self.key)
    }

    pub fn status(&self) -> KeyStatus {
        self.state.lock().status
    }

    fn summary(&self) -> KeySummary {
        let state = self.state.lock();
        KeySummary {
            key: redact_key(&self.key),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            last_used_at: state.last_used_at,
            last_checked_at: state.last_checked_at,
        }
    }
}

/// Registry of API keys with rotation and cooldown/disable semantics
pub struct KeyPool {
    slots: ArcSwap<Vec<KeyHandle>>,
    cursor: AtomicUsize,
    /// Serializes membership changes; selection never takes it.
    admin: Mutex<()>,
    clock: SharedClock,
    config: KeyPoolConfig,
}

impl KeyPool {
    /// Build a pool from an already-validated key list.
    pub fn new(keys: Vec<String>, clock: SharedClock, config: KeyPoolConfig) -> Self {
        let pool = Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
            admin: Mutex::new(()),
            clock,
            config,
        };
        pool.add_keys(keys);
        pool
    }

    /// Add keys at runtime. Duplicates of existing keys are skipped.
    /// Returns the number of keys actually added.
    pub fn add_keys(&self, keys: Vec<String>) -> usize {
        let _guard = self.admin.lock();
        let current = self.slots.load_full();
        let mut next: Vec<KeyHandle> = current.as_ref().clone();
        let mut added = 0;
        for key in keys {
            if key.is_empty() || next.iter().any(|s| s.key == key) {
                continue;
            }
            next.push(Arc::new(KeySlot::new(key)));
            added += 1;
        }
        if added > 0 {
            info!(added, total = next.len(), "keys added to pool");
            self.slots.store(Arc::new(next));
        }
        added
    }

    /// Remove a key. In-flight dispatches holding the slot finish with it.
    pub fn remove_key(&self, key: &str) -> Result<()> {
        let _guard = self.admin.lock();
        let current = self.slots.load_full();
        let next: Vec<KeyHandle> = current
            .iter()
            .filter(|s| s.key != key)
            .cloned()
            .collect();
        if next.len() == current.len() {
            return Err(RotorError::KeyNotFound);
        }
        self.slots.store(Arc::new(next));
        info!(key = %redact_key(key), "key removed from pool");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.load().is_empty()
    }

    /// Monitoring snapshot of every key.
    pub fn list(&self) -> Vec<KeySummary> {
        self.slots.load().iter().map(|s| s.summary()).collect()
    }

    /// Select the next Active key in round-robin order.
    ///
    /// The cursor advances on every inspected slot regardless of outcome;
    /// expired cooldowns are lifted here rather than by a timer.
    pub fn select(&self) -> Result<KeyHandle> {
        let slots = self.slots.load();
        if slots.is_empty() {
            return Err(RotorError::NoKeysAvailable);
        }

        let now = self.clock.now();
        let len = slots.len();
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let slot = &slots[idx];

            let mut state = slot.state.lock();
            if state.status == KeyStatus::Cooldown {
                if let Some(until) = state.cooldown_until {
                    if now >= until {
                        debug!(key = %slot.redacted(), "cooldown elapsed, key reactivated");
                        state.status = KeyStatus::Active;
                        state.consecutive_failures = 0;
                        state.cooldown_until = None;
                    }
                }
            }
            if state.status.is_selectable() {
                state.last_used_at = Some(Utc::now());
                return Ok(slot.clone());
            }
        }

        Err(RotorError::NoKeysAvailable)
    }

    /// Report a successful use: failure streak resets, Cooldown lifts.
    pub fn report_success(&self, key: &str) {
        let Some(slot) = self.find(key) else { return };
        let mut state = slot.state.lock();
        state.consecutive_failures = 0;
        state.last_checked_at = Some(Utc::now());
        if state.status == KeyStatus::Cooldown {
            state.status = KeyStatus::Active;
            state.cooldown_until = None;
        }
    }

    /// Report a failed use.
    ///
    /// Credential rejections disable the key outright; retrying an invalid
    /// credential only burns quota. Transient failures accumulate toward
    /// cooldown, which self-heals after the configured interval.
    pub fn report_failure(&self, key: &str, kind: FailureKind) {
        let Some(slot) = self.find(key) else { return };
        let mut state = slot.state.lock();
        state.last_checked_at = Some(Utc::now());

        if kind == FailureKind::CredentialInvalid {
            warn!(key = %slot.redacted(), "credential rejected, key disabled");
            state.status = KeyStatus::Disabled;
            state.cooldown_until = None;
            return;
        }

        state.consecutive_failures += 1;
        if state.status == KeyStatus::Active
            && state.consecutive_failures >= self.config.max_failures
        {
            warn!(
                key = %slot.redacted(),
                failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "failure threshold reached, key cooling down"
            );
            state.status = KeyStatus::Cooldown;
            state.cooldown_until = Some(self.clock.now() + self.config.cooldown);
        }
    }

    fn find(&self, key: &str) -> Option<KeyHandle> {
        self.slots.load().iter().find(|s| s.key == key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_pool(keys: &[&str], clock: Arc<ManualClock>) -> KeyPool {
        KeyPool::new(
            keys.iter().map(|k| k.to_string()).collect(),
            clock,
            KeyPoolConfig {
                max_failures: 3,
                cooldown: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_select_empty_pool() {
        let pool = test_pool(&[], Arc::new(ManualClock::new()));
        assert!(matches!(pool.select(), Err(RotorError::NoKeysAvailable)));
    }

    #[test]
    fn test_round_robin_insertion_order() {
        let pool = test_pool(&["k1", "k2", "k3"], Arc::new(ManualClock::new()));

        // Two full windows: each key exactly once per window, in order.
        for _ in 0..2 {
            for expected in ["k1", "k2", "k3"] {
                let slot = pool.select().unwrap();
                assert_eq!(slot.key(), expected);
                pool.report_success(slot.key());
            }
        }
    }

    #[test]
    fn test_selection_skips_unavailable_keys() {
        let pool = test_pool(&["k1", "k2", "k3"], Arc::new(ManualClock::new()));
        pool.report_failure("k2", FailureKind::CredentialInvalid);

        let picks: Vec<String> = (0..4)
            .map(|_| pool.select().unwrap().key().to_string())
            .collect();
        assert!(!picks.contains(&"k2".to_string()));
        assert_eq!(picks, vec!["k1", "k3", "k1", "k3"]);
    }

    #[test]
    fn test_transient_threshold_cools_down_not_disables() {
        let pool = test_pool(&["k1"], Arc::new(ManualClock::new()));

        pool.report_failure("k1", FailureKind::Transient);
        pool.report_failure("k1", FailureKind::Transient);
        assert_eq!(pool.list()[0].status, KeyStatus::Active);

        pool.report_failure("k1", FailureKind::Transient);
        assert_eq!(pool.list()[0].status, KeyStatus::Cooldown);
    }

    #[test]
    fn test_credential_invalid_disables_immediately() {
        let pool = test_pool(&["k1"], Arc::new(ManualClock::new()));
        pool.report_failure("k1", FailureKind::CredentialInvalid);
        assert_eq!(pool.list()[0].status, KeyStatus::Disabled);

        // Disabled is permanent until administrative action; success
        // reports and elapsed time do not revive it.
        pool.report_success("k1");
        assert_eq!(pool.list()[0].status, KeyStatus::Disabled);
    }

    #[test]
    fn test_cooldown_lifts_after_interval() {
        let clock = Arc::new(ManualClock::new());
        let pool = test_pool(&["k1"], clock.clone());

        for _ in 0..3 {
            pool.report_failure("k1", FailureKind::Transient);
        }
        assert!(matches!(pool.select(), Err(RotorError::NoKeysAvailable)));

        clock.advance(Duration::from_secs(59));
        assert!(matches!(pool.select(), Err(RotorError::NoKeysAvailable)));

        clock.advance(Duration::from_secs(1));
        let slot = pool.select().unwrap();
        assert_eq!(slot.key(), "k1");
        assert_eq!(pool.list()[0].status, KeyStatus::Active);
        assert_eq!(pool.list()[0].consecutive_failures, 0);
    }

    #[test]
    fn test_success_resets_streak_and_lifts_cooldown() {
        let pool = test_pool(&["k1", "k2"], Arc::new(ManualClock::new()));

        for _ in 0..3 {
            pool.report_failure("k1", FailureKind::Transient);
        }
        assert_eq!(pool.list()[0].status, KeyStatus::Cooldown);

        pool.report_success("k1");
        assert_eq!(pool.list()[0].status, KeyStatus::Active);
        assert_eq!(pool.list()[0].consecutive_failures, 0);
    }

    #[test]
    fn test_add_and_remove_keys() {
        let pool = test_pool(&["k1"], Arc::new(ManualClock::new()));
        assert_eq!(pool.add_keys(vec!["k1".into(), "k2".into()]), 1);
        assert_eq!(pool.len(), 2);

        pool.remove_key("k1").unwrap();
        assert_eq!(pool.len(), 1);
        assert!(matches!(
            pool.remove_key("k1"),
            Err(RotorError::KeyNotFound)
        ));
    }

    #[test]
    fn test_removed_key_handle_stays_valid() {
        let pool = test_pool(&["k1", "k2"], Arc::new(ManualClock::new()));
        let held = pool.select().unwrap();
        pool.remove_key(held.key()).unwrap();
        assert_eq!(held.key(), "k1");
    }

    #[test]
    fn test_list_redacts_keys() {
        let pool = test_pool(&["sk-abcdefghijklmnop"], Arc::new(ManualClock::new()));
        assert_eq!(pool.list()[0].key, "sk-a...mnop");
    }
}
