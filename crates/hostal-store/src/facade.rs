// ABOUTME: Synchronous key/value facade with an in-memory mirror and a write-behind worker task.
// ABOUTME: Credential keys persist to the credential store; everything else goes to the TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use hostal_core::{AuthKind, AuthScope, Clock, expiry_deadline};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::cache::CacheLayer;
use crate::credentials::CredentialStore;
use crate::error::StoreError;

/// Default cache lifetime for non-credential facade writes: one week.
pub const DEFAULT_FACADE_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Keys that are credentials rather than cached preferences.
const CREDENTIAL_KEYS: &[(&str, AuthKind)] = &[
    ("accessToken", AuthKind::Token),
    ("refreshToken", AuthKind::Token),
    ("tokenType", AuthKind::Token),
    ("expiresIn", AuthKind::Token),
    ("sesionId", AuthKind::Token),
    ("user", AuthKind::User),
];

/// Whether `key` routes to the credential store, and as what kind.
pub fn credential_kind(key: &str) -> Option<AuthKind> {
    CREDENTIAL_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone)]
struct MirrorEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// The in-memory view. `versions` records the last local mutation of each
/// key since the last clear; `epoch` moves on every clear. A background warm
/// is applied only if neither changed since the miss that scheduled it.
#[derive(Debug, Default)]
struct Mirror {
    values: HashMap<String, MirrorEntry>,
    versions: HashMap<String, u64>,
    next_version: u64,
    epoch: u64,
}

impl Mirror {
    fn touch(&mut self, key: &str) {
        self.next_version += 1;
        self.versions.insert(key.to_string(), self.next_version);
    }

    fn version_of(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Forget every key. Warms scheduled before this point become stale.
    fn clear(&mut self) {
        self.values.clear();
        self.versions.clear();
        self.epoch += 1;
    }
}

type SharedMirror = Arc<RwLock<Mirror>>;

enum FacadeOp {
    Put { key: String, value: Value },
    Remove { key: String },
    ClearAll,
    Warm { key: String, version: u64, epoch: u64 },
    Flush(oneshot::Sender<()>),
}

/// Handle to the facade. Reads and writes are synchronous against the
/// mirror; persistence happens in FIFO order on a single worker task.
#[derive(Clone)]
pub struct SyncFacade {
    mirror: SharedMirror,
    op_tx: mpsc::UnboundedSender<FacadeOp>,
    cache: CacheLayer,
    credentials: CredentialStore,
    ttl_minutes: i64,
}

impl SyncFacade {
    /// Seed the mirror from every credential and every live cache record,
    /// then start the write-behind worker.
    pub async fn init(
        cache: CacheLayer,
        credentials: CredentialStore,
        ttl_minutes: i64,
    ) -> Result<Self, StoreError> {
        let mut mirror = Mirror::default();
        for record in cache.live_entries().await? {
            mirror.values.insert(
                record.key,
                MirrorEntry {
                    value: record.value,
                    expires_at: record.expires_at,
                },
            );
        }
        // Credentials win if a key somehow exists in both places.
        for record in credentials.list().await? {
            mirror.values.insert(
                record.key,
                MirrorEntry {
                    value: record.value,
                    expires_at: None,
                },
            );
        }
        tracing::info!("facade mirror seeded with {} keys", mirror.values.len());

        let mirror = Arc::new(RwLock::new(mirror));
        let (op_tx, op_rx) = mpsc::unbounded_channel();

        let worker = WriteBehind {
            mirror: Arc::clone(&mirror),
            op_rx,
            cache: cache.clone(),
            credentials: credentials.clone(),
            ttl_minutes,
        };
        tokio::spawn(worker.run());

        Ok(Self {
            mirror,
            op_tx,
            cache,
            credentials,
            ttl_minutes,
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.cache.clock().now()
    }

    fn send(&self, op: FacadeOp) -> Result<(), StoreError> {
        self.op_tx.send(op).map_err(|_| StoreError::WorkerStopped)
    }

    /// Update the mirror immediately and schedule the durable write.
    pub fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let expires_at = match credential_kind(key) {
            Some(_) => None,
            None => expiry_deadline(self.now(), self.ttl_minutes),
        };
        {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            mirror.values.insert(
                key.to_string(),
                MirrorEntry {
                    value: value.clone(),
                    expires_at,
                },
            );
            mirror.touch(key);
        }
        self.send(FacadeOp::Put {
            key: key.to_string(),
            value,
        })
    }

    /// The mirrored value for `key`. On a miss this returns None and asks the
    /// worker to look the key up durably, so a later read may see it.
    pub fn read(&self, key: &str) -> Option<Value> {
        let now = self.now();
        let (hit, version, epoch) = {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            let expired = mirror
                .values
                .get(key)
                .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now));
            if expired {
                mirror.values.remove(key);
            }
            let hit = mirror.values.get(key).map(|entry| entry.value.clone());
            (hit, mirror.version_of(key), mirror.epoch)
        };

        if hit.is_none() {
            let warm = FacadeOp::Warm {
                key: key.to_string(),
                version,
                epoch,
            };
            if self.send(warm).is_err() {
                tracing::warn!("facade worker stopped; not warming {}", key);
            }
        }
        hit
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            mirror.values.remove(key);
            mirror.touch(key);
        }
        self.send(FacadeOp::Remove {
            key: key.to_string(),
        })
    }

    /// Drop every mirrored key and clear both the cache and the credentials.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        {
            self.mirror
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        self.send(FacadeOp::ClearAll)
    }

    /// Wait until every operation queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeOp::Flush(tx))?;
        rx.await.map_err(|_| StoreError::WorkerStopped)
    }

    /// Read straight from durable storage, bypassing the mirror.
    pub async fn get_durable(&self, key: &str) -> Result<Option<Value>, StoreError> {
        durable_lookup(&self.cache, &self.credentials, key).await
    }

    /// Number of keys currently mirrored.
    pub fn len(&self) -> usize {
        self.mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn durable_lookup(
    cache: &CacheLayer,
    credentials: &CredentialStore,
    key: &str,
) -> Result<Option<Value>, StoreError> {
    match credential_kind(key) {
        Some(_) => credentials.get_auth(key).await,
        None => cache.get_cache_value(key).await,
    }
}

/// The worker applying facade operations to the store, one at a time.
struct WriteBehind {
    mirror: SharedMirror,
    op_rx: mpsc::UnboundedReceiver<FacadeOp>,
    cache: CacheLayer,
    credentials: CredentialStore,
    ttl_minutes: i64,
}

impl WriteBehind {
    async fn run(mut self) {
        while let Some(op) = self.op_rx.recv().await {
            match op {
                FacadeOp::Put { key, value } => {
                    if let Err(e) = self.put(&key, value).await {
                        tracing::warn!("facade write of {} failed: {}", key, e);
                    }
                }
                FacadeOp::Remove { key } => {
                    if let Err(e) = self.remove(&key).await {
                        tracing::warn!("facade remove of {} failed: {}", key, e);
                    }
                }
                FacadeOp::ClearAll => {
                    if let Err(e) = self.clear_all().await {
                        tracing::warn!("facade clear failed: {}", e);
                    }
                }
                FacadeOp::Warm {
                    key,
                    version,
                    epoch,
                } => self.warm(key, version, epoch).await,
                FacadeOp::Flush(done) => {
                    // The caller may have stopped waiting
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("facade worker stopped");
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        match credential_kind(key) {
            Some(kind) => {
                self.credentials
                    .set_auth(key, value, kind, AuthScope::Persistent)
                    .await
            }
            None => {
                self.cache
                    .set_cache_value(key, value, Some(self.ttl_minutes))
                    .await
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match credential_kind(key) {
            Some(_) => self.credentials.delete_auth(key).await.map(|_| ()),
            None => self.cache.delete_cache(key).await.map(|_| ()),
        }
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.credentials.clear_all().await?;
        self.cache.clear_cache().await?;
        Ok(())
    }

    async fn warm(&self, key: String, version: u64, epoch: u64) {
        let record = match credential_kind(&key) {
            Some(_) => self
                .credentials
                .get_auth(&key)
                .await
                .map(|v| v.map(|value| (value, None))),
            None => self
                .cache
                .get_record(&key)
                .await
                .map(|r| r.map(|r| (r.value, r.expires_at))),
        };

        let (value, expires_at) = match record {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("facade lookup of {} failed: {}", key, e);
                return;
            }
        };

        let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
        if mirror.epoch != epoch || mirror.version_of(&key) != version {
            tracing::debug!("discarding stale warm of {}", key);
            return;
        }
        mirror
            .values
            .insert(key, MirrorEntry { value, expires_at });
    }
}
