// ABOUTME: Cache records with an absolute expiry deadline computed from a TTL at write time.
// ABOUTME: is_expired is the single expiry predicate shared by lazy reads and sweeps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{CollectionDef, Record};

/// The deadline `ttl_minutes` after `now`, or None when it falls outside the
/// representable time range. Such a TTL never expires.
pub fn expiry_deadline(now: DateTime<Utc>, ttl_minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(ttl_minutes).and_then(|ttl| now.checked_add_signed(ttl))
}

/// A cached value. `expires_at = None` never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub value: Value,
    pub written_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    /// Build a record written at `now`. The deadline is fixed here and is not
    /// re-evaluated relative to read time.
    pub fn new(key: String, value: Value, now: DateTime<Utc>, ttl_minutes: Option<i64>) -> Self {
        Self {
            key,
            value,
            written_at: now,
            expires_at: ttl_minutes.and_then(|ttl| expiry_deadline(now, ttl)),
        }
    }

    /// A record whose deadline is at or before `now` is logically absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

impl Record for CacheRecord {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "cache",
        key_path: "key",
        auto_increment: false,
        indexes: &[],
    };
}
