//! Key pool: registry, selection, and live-traffic health updates
//!
//! The pool holds one [`KeyRecord`] per key string ever seen, plus the
//! ordered active key set for the current configuration (static pools)
//! or the most recent request (per-request pools). All record state is
//! guarded by a single mutex; the lock is only held for the brief
//! selection/mutation critical section and never across network I/O.

use super::record::{KeyRecord, KeySnapshot};
use super::strategy::SelectionStrategy;
use crate::utils::mask_key;
use chrono::{Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Selection failed because no key is eligible
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no available API key")]
pub struct NoAvailableKey;

/// Pool of API keys with health tracking and rotation
pub struct KeyPool {
    strategy: SelectionStrategy,
    cooldown: Duration,
    inner: Mutex<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    /// Ordered active key set; order defines round-robin iteration
    active: Vec<String>,
    /// All records ever created, keyed by the key string; never pruned
    records: HashMap<String, KeyRecord>,
    /// Round-robin cursor over `active`
    cursor: usize,
}

impl KeyPool {
    pub fn new(strategy: SelectionStrategy, cooldown: std::time::Duration) -> Self {
        Self {
            strategy,
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::seconds(10)),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Replace the active key set, creating records for unseen keys
    ///
    /// Duplicate entries collapse to their first occurrence so a
    /// repeated key gets one active slot, one selection weight, and
    /// one stats entry. Existing records are left untouched: a key
    /// that is cooling down or has accumulated a request count keeps
    /// that state across any number of upserts (per-request pools
    /// replace the active set on every request).
    pub fn upsert_keys(&self, keys: &[String]) {
        let mut inner = self.lock();
        let mut active = Vec::with_capacity(keys.len());
        for key in keys {
            if active.contains(key) {
                continue;
            }
            inner
                .records
                .entry(key.clone())
                .or_insert_with(|| KeyRecord::new(key.clone()));
            active.push(key.clone());
        }
        inner.active = active;
    }

    /// Pick the next eligible key and record the selection
    ///
    /// Synchronous and O(pool size); elapsed cooldowns encountered
    /// during the scan are cleared in place. Fails when the pool is
    /// empty or every key is unhealthy or cooling down — the caller
    /// turns that into a 503 without contacting the upstream.
    pub fn select_key(&self) -> Result<String, NoAvailableKey> {
        let mut inner = self.lock();
        if inner.active.is_empty() {
            return Err(NoAvailableKey);
        }

        let now = Utc::now();
        let len = inner.active.len();

        // Clear elapsed cooldowns and collect the eligible slots.
        let mut eligible = Vec::with_capacity(len);
        for idx in 0..len {
            let key = inner.active[idx].clone();
            if let Some(record) = inner.records.get_mut(&key) {
                if let Some(until) = record.failed_until {
                    if now >= until {
                        record.failed_until = None;
                    }
                }
                if record.is_eligible(now) {
                    eligible.push(idx);
                }
            }
        }

        if eligible.is_empty() {
            return Err(NoAvailableKey);
        }

        let chosen = match self.strategy {
            SelectionStrategy::RoundRobin => {
                // Advance the cursor once per call, then take the first
                // eligible slot at or after it, wrapping.
                let start = inner.cursor % len;
                inner.cursor = (start + 1) % len;
                *eligible
                    .iter()
                    .find(|&&idx| idx >= start)
                    .unwrap_or(&eligible[0])
            }
            SelectionStrategy::Random => {
                eligible[rand::thread_rng().gen_range(0..eligible.len())]
            }
        };

        let key = inner.active[chosen].clone();
        if let Some(record) = inner.records.get_mut(&key) {
            record.request_count += 1;
            record.last_used = Some(now);
        }
        Ok(key)
    }

    /// Feed an observed upstream status code back into the registry
    ///
    /// 401/403 is treated as a strong signal of an invalid or suspended
    /// credential: the key is cooled down for the configured window so
    /// it is not hot-looped even though the window is short. A 5xx is
    /// logged but never flips health by itself; transient upstream
    /// failures must not disable a credential.
    pub fn report_outcome(&self, key: &str, status: u16) {
        match status {
            401 | 403 => {
                let until = Utc::now() + self.cooldown;
                let mut inner = self.lock();
                if let Some(record) = inner.records.get_mut(key) {
                    record.failed_until = Some(until);
                }
                drop(inner);
                tracing::warn!(
                    key = %mask_key(key),
                    status,
                    cooldown_secs = self.cooldown.num_seconds(),
                    "Key rejected by upstream, cooling down"
                );
            }
            s if s >= 500 => {
                tracing::warn!(
                    key = %mask_key(key),
                    status,
                    "Upstream server error, key health unaffected"
                );
            }
            _ => {}
        }
    }

    /// Set the administrative health flag for a key
    ///
    /// Only the active probe calls this; live traffic never touches the
    /// flag, so a single bad response cannot disable a key the probe
    /// still considers fine.
    pub fn set_healthy(&self, key: &str, healthy: bool) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(key) {
            if record.healthy != healthy {
                tracing::info!(
                    key = %mask_key(key),
                    healthy,
                    "Probe updated key health"
                );
            }
            record.healthy = healthy;
        }
    }

    /// Whether at least one active key is currently eligible
    pub fn has_available(&self) -> bool {
        let inner = self.lock();
        let now = Utc::now();
        inner
            .active
            .iter()
            .filter_map(|key| inner.records.get(key))
            .any(|record| record.is_eligible(now))
    }

    /// Read-only copies of the active records, in pool order
    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let inner = self.lock();
        inner
            .active
            .iter()
            .filter_map(|key| inner.records.get(key))
            .map(KeySnapshot::from)
            .collect()
    }

    /// The active key strings, in pool order
    pub fn active_keys(&self) -> Vec<String> {
        self.lock().active.clone()
    }

    /// Number of keys in the active pool
    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // A poisoned pool lock means a panic mid-mutation; the record
        // state is still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn set_failed_until(&self, key: &str, until: Option<chrono::DateTime<Utc>>) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(key) {
            record.failed_until = until;
        }
    }
}
