use crate::clock::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Versioned, timestamped wrapper persisted for every cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch milliseconds
    pub timestamp: i64,
    pub version: u32,
    /// Time-to-live in milliseconds
    pub expiry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// Everything but the payload; lets scans judge entries of any type.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntryMeta {
    pub timestamp: i64,
    pub version: u32,
    pub expiry: u64,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    StaleVersion,
    Expired,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, now_ms: i64, version: u32, expiry: Duration, owner_id: Option<String>) -> Self {
        Self {
            data,
            timestamp: now_ms,
            version,
            expiry: duration_ms(expiry) as u64,
            owner_id,
        }
    }

    pub fn validity(&self, now_ms: i64, current_version: u32) -> Validity {
        validity(self.timestamp, self.version, self.expiry, now_ms, current_version)
    }

    pub fn is_valid(&self, now_ms: i64, current_version: u32) -> bool {
        self.validity(now_ms, current_version) == Validity::Valid
    }
}

impl EntryMeta {
    pub fn validity(&self, now_ms: i64, current_version: u32) -> Validity {
        validity(self.timestamp, self.version, self.expiry, now_ms, current_version)
    }
}

fn validity(timestamp: i64, version: u32, expiry: u64, now_ms: i64, current_version: u32) -> Validity {
    if version != current_version {
        return Validity::StaleVersion;
    }
    // Entries written "in the future" (clock skew) count as fresh
    let age = now_ms.saturating_sub(timestamp);
    if age >= i64::try_from(expiry).unwrap_or(i64::MAX) {
        Validity::Expired
    } else {
        Validity::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    #[test]
    fn test_fresh_entry_is_valid() {
        let entry = CacheEntry::new(vec![1, 2], 0, 1, Duration::from_secs(300), None);
        assert_eq!(entry.validity(4 * MINUTE, 1), Validity::Valid);
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let entry = CacheEntry::new("x", 0, 1, Duration::from_secs(300), None);
        assert_eq!(entry.validity(5 * MINUTE - 1, 1), Validity::Valid);
        assert_eq!(entry.validity(5 * MINUTE, 1), Validity::Expired);
    }

    #[test]
    fn test_version_mismatch_wins_over_freshness() {
        let entry = CacheEntry::new("x", 0, 1, Duration::from_secs(300), None);
        assert_eq!(entry.validity(0, 2), Validity::StaleVersion);
    }

    #[test]
    fn test_huge_expiry_never_expires() {
        let now = 1_700_000_000_000;
        let entry = CacheEntry::new("x", now, 1, Duration::MAX, None);

        assert_eq!(entry.expiry, i64::MAX as u64);
        assert_eq!(entry.validity(now + 10 * 365 * 24 * 60 * MINUTE, 1), Validity::Valid);

        // Hand-written entries may carry values past i64::MAX
        let meta = EntryMeta {
            timestamp: now,
            version: 1,
            expiry: u64::MAX,
            owner_id: None,
        };
        assert_eq!(meta.validity(now + MINUTE, 1), Validity::Valid);
    }

    #[test]
    fn test_meta_reads_serialized_entries() {
        let entry = CacheEntry::new(
            serde_json::json!({"plate": "ABC-123"}),
            10,
            3,
            Duration::from_millis(500),
            Some("u1".to_string()),
        );
        let raw = serde_json::to_vec(&entry).unwrap();
        let meta: EntryMeta = serde_json::from_slice(&raw).unwrap();

        assert_eq!(meta.owner_id.as_deref(), Some("u1"));
        assert_eq!(meta.validity(509, 3), Validity::Valid);
        assert_eq!(meta.validity(510, 3), Validity::Expired);
    }
}
