// ABOUTME: TTL-bounded cache layer over the `cache` collection with lazy eviction and sweeps.
// ABOUTME: Expired records are never returned; both eviction paths share CacheRecord::is_expired.

use std::sync::Arc;

use hostal_core::{CacheRecord, Clock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::collection::CollectionStore;
use crate::error::StoreError;

#[derive(Clone)]
pub struct CacheLayer {
    store: CollectionStore,
    clock: Arc<dyn Clock>,
}

impl CacheLayer {
    pub fn new(store: CollectionStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Store `value` under `key`. `ttl_minutes = None` never expires.
    pub async fn set_cache<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_minutes: Option<i64>,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.set_cache_value(key, value, ttl_minutes).await
    }

    pub async fn set_cache_value(
        &self,
        key: &str,
        value: Value,
        ttl_minutes: Option<i64>,
    ) -> Result<(), StoreError> {
        let record = CacheRecord::new(key.to_string(), value, self.clock.now(), ttl_minutes);
        self.store.set(&record).await?;
        Ok(())
    }

    /// Read a cached value, decoding it as `T`. Misses on absent or expired keys.
    pub async fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_cache_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_cache_value(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_record(key).await?.map(|r| r.value))
    }

    /// The live record for `key`. An expired record found here is deleted
    /// before reporting a miss.
    pub async fn get_record(&self, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let Some(record) = self.store.get::<CacheRecord>(key).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        if !record.is_expired(now) {
            return Ok(Some(record));
        }

        // Re-check inside the delete so a concurrent refresh is not evicted.
        let key_owned = key.to_string();
        match self
            .store
            .delete_where::<CacheRecord, _>(move |r| r.key == key_owned && r.is_expired(now))
            .await
        {
            Ok(n) if n > 0 => tracing::debug!("evicted expired cache entry {}", key),
            Ok(_) => {}
            Err(e) => tracing::warn!("failed to evict expired cache entry {}: {}", key, e),
        }
        Ok(None)
    }

    pub async fn delete_cache(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete::<CacheRecord>(key).await
    }

    pub async fn clear_cache(&self) -> Result<usize, StoreError> {
        self.store.clear::<CacheRecord>().await
    }

    /// Remove every expired record. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let removed = self
            .store
            .delete_where::<CacheRecord, _>(move |r| r.is_expired(now))
            .await?;
        if removed > 0 {
            tracing::info!("cache sweep removed {} expired entries", removed);
        }
        Ok(removed)
    }

    /// All records that are still live right now.
    pub async fn live_entries(&self) -> Result<Vec<CacheRecord>, StoreError> {
        let now = self.clock.now();
        let records = self.store.get_all::<CacheRecord>().await?;
        Ok(records.into_iter().filter(|r| !r.is_expired(now)).collect())
    }
}
