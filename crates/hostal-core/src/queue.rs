// ABOUTME: Sync-queue entries: pending remote mutations with retry bookkeeping and status.
// ABOUTME: Status moves pending -> completed or pending -> dead_letter once retries are exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{CollectionDef, IndexDef, Record};

/// Lifecycle state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Completed,
    /// Retry budget exhausted; excluded from automatic replay.
    DeadLetter,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Completed => "completed",
            QueueStatus::DeadLetter => "dead_letter",
        }
    }
}

/// A mutation waiting to be replayed against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Assigned by the store on first write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub kind: String,
    pub endpoint: String,
    pub method: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
    pub max_retries: u32,
    pub status: QueueStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(
        kind: String,
        endpoint: String,
        method: String,
        payload: Value,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            kind,
            endpoint,
            method,
            payload,
            enqueued_at: now,
            retries: 0,
            max_retries,
            status: QueueStatus::Pending,
            completed_at: None,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Mark a pending entry completed. Returns false, leaving the entry
    /// untouched, when it is not pending.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != QueueStatus::Pending {
            return false;
        }
        self.status = QueueStatus::Completed;
        self.completed_at = Some(now);
        self.last_attempt_at = Some(now);
        self.last_error = None;
        true
    }

    /// Record a failed replay attempt. Returns true when this failure
    /// exhausted the retry budget and moved the entry to dead-letter.
    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if self.status != QueueStatus::Pending {
            return false;
        }
        self.retries = self.retries.saturating_add(1);
        self.last_error = Some(error);
        self.last_attempt_at = Some(now);
        if self.retries >= self.max_retries {
            self.status = QueueStatus::DeadLetter;
            return true;
        }
        false
    }

    /// Put a dead-lettered entry back in line with a fresh retry budget.
    pub fn requeue(&mut self) -> bool {
        if self.status != QueueStatus::DeadLetter {
            return false;
        }
        self.status = QueueStatus::Pending;
        self.retries = 0;
        true
    }

    /// Completed entries older than the cutoff may be pruned.
    pub fn is_prunable(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Completed
            && matches!(self.completed_at, Some(done) if done < cutoff)
    }
}

impl Record for QueueEntry {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "sync_queue",
        key_path: "id",
        auto_increment: true,
        indexes: &[IndexDef::new("status", "status"), IndexDef::new("kind", "kind")],
    };
}
