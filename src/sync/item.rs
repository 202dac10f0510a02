use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Sync priority, ordered so that `High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Default for SyncPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Identity of a queued item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    pub key: String,
    pub owner_id: String,
}

/// A local mutation waiting to be written to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub key: String,
    pub payload: Value,
    pub owner_id: String,
    pub priority: SyncPriority,
    /// Epoch milliseconds of the latest enqueue
    pub last_modified: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Not attempted before this time, epoch milliseconds
    #[serde(default)]
    pub next_attempt_at: i64,
    /// Bumped on every enqueue; tells an in-flight attempt whether the item was replaced
    #[serde(default)]
    pub revision: u64,
}

impl SyncItem {
    pub fn sync_key(&self) -> SyncKey {
        SyncKey {
            key: self.key.clone(),
            owner_id: self.owner_id.clone(),
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at <= now_ms
    }

    pub fn retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Sort for a cycle: higher priority first, then older first
pub(crate) fn cycle_order(a: &SyncItem, b: &SyncItem) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.last_modified.cmp(&b.last_modified))
        .then_with(|| a.revision.cmp(&b.revision))
}

/// Final outcome of one item, kept in a bounded audit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub key: String,
    pub owner_id: String,
    pub success: bool,
    /// Epoch milliseconds
    pub attempted_at: i64,
    pub duration: Duration,
    pub retry_count: u32,
    pub error: Option<String>,
}
