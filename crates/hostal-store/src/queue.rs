// ABOUTME: Durable sync queue of pending remote mutations with bounded retries and dead-lettering.
// ABOUTME: Drains replay pending entries in id order through a caller-supplied async executor.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hostal_core::{Clock, QueueEntry, QueueStatus};
use serde::Serialize;
use serde_json::Value;

use crate::collection::CollectionStore;
use crate::error::StoreError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Outcome counts of a single drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `failed` that exhausted their retry budget this pass.
    pub dead_lettered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub completed: usize,
    pub dead_letter: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.completed + self.dead_letter
    }
}

#[derive(Clone)]
pub struct SyncQueue {
    store: CollectionStore,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncQueue {
    pub fn new(store: CollectionStore, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self {
            store,
            clock,
            max_retries,
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append a mutation and return its assigned id.
    pub async fn enqueue(
        &self,
        kind: &str,
        endpoint: &str,
        method: &str,
        payload: Value,
    ) -> Result<i64, StoreError> {
        let entry = QueueEntry::new(
            kind.to_string(),
            endpoint.to_string(),
            method.to_string(),
            payload,
            self.max_retries,
            self.clock.now(),
        );
        let key = self.store.set(&entry).await?;
        let id = key.as_int().ok_or_else(|| StoreError::MissingKey {
            collection: "sync_queue".to_string(),
            key_path: "id".to_string(),
        })?;
        tracing::debug!("enqueued {} {} {} as #{}", kind, method, endpoint, id);
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        self.store.get::<QueueEntry>(id).await
    }

    /// Entries awaiting replay, oldest first. Dead-lettered entries are excluded.
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.list_status(QueueStatus::Pending).await
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.list_status(QueueStatus::DeadLetter).await
    }

    pub async fn list_all(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.store.get_all::<QueueEntry>().await
    }

    async fn list_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, StoreError> {
        self.store
            .get_by_index::<QueueEntry>("status", status.as_str())
            .await
    }

    /// Replay every pending entry in id order. A failing entry is recorded and
    /// skipped; it never stops the entries behind it. An outcome that cannot
    /// be written is logged and the entry stays pending for the next pass.
    /// Only one drain runs at a time.
    pub async fn drain<F, Fut, E>(&self, mut executor: F) -> Result<DrainReport, StoreError>
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let _guard = self.drain_lock.lock().await;
        let pending = self.list_pending().await?;
        let mut report = DrainReport {
            total: pending.len(),
            ..DrainReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        tracing::info!("draining {} pending sync entries", pending.len());
        for mut entry in pending {
            let id = entry.id.unwrap_or_default();
            match executor(entry.clone()).await {
                Ok(()) => {
                    entry.mark_completed(self.clock.now());
                    report.succeeded += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    if entry.record_failure(message.clone(), self.clock.now()) {
                        report.dead_lettered += 1;
                        tracing::warn!(
                            "sync entry #{} dead-lettered after {} attempts: {}",
                            id,
                            entry.retries,
                            message
                        );
                    } else {
                        tracing::warn!(
                            "sync entry #{} failed (attempt {}/{}): {}",
                            id,
                            entry.retries,
                            entry.max_retries,
                            message
                        );
                    }
                }
            }
            if let Err(e) = self.store.set(&entry).await {
                tracing::warn!("could not record outcome of sync entry #{}: {}", id, e);
            }
        }

        tracing::info!(
            "drain finished: {} succeeded, {} failed, {} dead-lettered",
            report.succeeded,
            report.failed,
            report.dead_lettered
        );
        Ok(report)
    }

    /// Delete completed entries finished more than `older_than_days` ago.
    pub async fn prune_completed(&self, older_than_days: i64) -> Result<usize, StoreError> {
        // A window reaching past the representable range keeps everything
        let cutoff = Duration::try_days(older_than_days)
            .and_then(|window| self.clock.now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self
            .store
            .delete_where::<QueueEntry, _>(move |e| e.is_prunable(cutoff))
            .await?;
        if removed > 0 {
            tracing::info!("pruned {} completed sync entries", removed);
        }
        Ok(removed)
    }

    /// Move a dead-lettered entry back to pending with a fresh retry budget.
    /// Returns false when the entry is absent or not dead-lettered.
    pub async fn requeue(&self, id: i64) -> Result<bool, StoreError> {
        let Some(mut entry) = self.get(id).await? else {
            return Ok(false);
        };
        if !entry.requeue() {
            return Ok(false);
        }
        self.store.set(&entry).await?;
        tracing::info!("requeued sync entry #{}", id);
        Ok(true)
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        Ok(QueueStats {
            pending: self.list_pending().await?.len(),
            completed: self.list_status(QueueStatus::Completed).await?.len(),
            dead_letter: self.list_dead_letters().await?.len(),
        })
    }
}
