// ABOUTME: Scoped credential store over the `auth` collection.
// ABOUTME: Session-scope clears leave persistent credentials intact ("remember me").

use std::sync::Arc;

use hostal_core::{AuthKind, AuthRecord, AuthScope, Clock};
use serde_json::Value;

use crate::collection::CollectionStore;
use crate::error::StoreError;

#[derive(Clone)]
pub struct CredentialStore {
    store: CollectionStore,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(store: CollectionStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Write a credential, replacing any record under the same key.
    pub async fn set_auth(
        &self,
        key: &str,
        value: Value,
        kind: AuthKind,
        scope: AuthScope,
    ) -> Result<(), StoreError> {
        let record = AuthRecord {
            key: key.to_string(),
            value,
            kind,
            scope,
            written_at: self.clock.now(),
        };
        self.store.set(&record).await?;
        Ok(())
    }

    pub async fn get_auth(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_auth_record(key).await?.map(|r| r.value))
    }

    pub async fn get_auth_record(&self, key: &str) -> Result<Option<AuthRecord>, StoreError> {
        self.store.get::<AuthRecord>(key).await
    }

    pub async fn delete_auth(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete::<AuthRecord>(key).await
    }

    /// Remove only the records in `scope`. Safe to call on every restart.
    pub async fn clear_scope(&self, scope: AuthScope) -> Result<usize, StoreError> {
        let removed = self
            .store
            .delete_by_index::<AuthRecord>("scope", scope.as_str())
            .await?;
        tracing::info!("cleared {} {} credentials", removed, scope.as_str());
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        self.store.clear::<AuthRecord>().await
    }

    pub async fn list(&self) -> Result<Vec<AuthRecord>, StoreError> {
        self.store.get_all::<AuthRecord>().await
    }
}
