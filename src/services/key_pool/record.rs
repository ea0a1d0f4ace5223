//! Key records and diagnostic snapshots
//!
//! A [`KeyRecord`] holds the health metadata tracked for one API key.
//! Records are created the first time a key string is seen and live for
//! the rest of the process; they are never deleted, only cooled down or
//! flagged unhealthy and later eligible again.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health metadata for a single API key
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// The credential string itself; never mutated after creation
    pub key: String,
    /// Administrative health flag, owned by the active probe when
    /// probing is enabled
    pub healthy: bool,
    /// Cooldown deadline set after an upstream 401/403; cleared lazily
    /// once elapsed
    pub failed_until: Option<DateTime<Utc>>,
    /// Times this key has been selected; diagnostics only
    pub request_count: u64,
    /// Most recent selection timestamp
    pub last_used: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Create a fresh record: healthy, no cooldown, never used
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            healthy: true,
            failed_until: None,
            request_count: 0,
            last_used: None,
        }
    }

    /// Whether the key may be selected at `now`
    ///
    /// An elapsed cooldown makes the key immediately eligible; clearing
    /// the stale deadline is left to the caller holding the pool lock.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.healthy && self.failed_until.map_or(true, |until| now >= until)
    }
}

/// Read-only copy of a record, exposed by the stats endpoint
///
/// The key itself is carried for the caller to mask; it is never
/// serialized.
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    #[serde(skip)]
    pub key: String,
    pub healthy: bool,
    pub requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&KeyRecord> for KeySnapshot {
    fn from(record: &KeyRecord) -> Self {
        Self {
            key: record.key.clone(),
            healthy: record.healthy,
            requests: record.request_count,
            failed_until: record.failed_until,
            last_used: record.last_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record_is_eligible() {
        let record = KeyRecord::new("sk-test");
        assert!(record.healthy);
        assert_eq!(record.request_count, 0);
        assert!(record.is_eligible(Utc::now()));
    }

    #[test]
    fn test_cooldown_blocks_eligibility() {
        let now = Utc::now();
        let mut record = KeyRecord::new("sk-test");
        record.failed_until = Some(now + Duration::seconds(10));
        assert!(!record.is_eligible(now));
        // Deadline reached: immediately eligible again, no confirmation step
        assert!(record.is_eligible(now + Duration::seconds(10)));
    }

    #[test]
    fn test_unhealthy_blocks_regardless_of_cooldown() {
        let mut record = KeyRecord::new("sk-test");
        record.healthy = false;
        assert!(!record.is_eligible(Utc::now()));
    }

    #[test]
    fn test_snapshot_skips_absent_timestamps() {
        let record = KeyRecord::new("sk-test");
        let snap = KeySnapshot::from(&record);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["requests"], 0);
        assert!(json.get("failed_until").is_none());
        assert!(json.get("last_used").is_none());
        assert!(json.get("key").is_none());
    }
}
