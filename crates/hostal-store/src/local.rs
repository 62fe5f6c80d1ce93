// ABOUTME: LocalStore, the application-facing handle: typed domain accessors, auth session helpers
// ABOUTME: and sync-queue entry points, composed from the collection, cache, credential and queue layers.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use hostal_core::{
    AuthKind, AuthScope, Clock, Cuarto, Edificio, IndexValue, Mantenimiento, QueueEntry, Record,
    SystemClock, Usuario, hostal_schema,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheLayer;
use crate::collection::{BatchReport, CollectionStore};
use crate::config::StoreConfig;
use crate::credentials::CredentialStore;
use crate::error::StoreError;
use crate::facade::SyncFacade;
use crate::queue::{DrainReport, SyncQueue};

const ACCESS_TOKEN: &str = "accessToken";
const REFRESH_TOKEN: &str = "refreshToken";
const TOKEN_TYPE: &str = "tokenType";
const EXPIRES_IN: &str = "expiresIn";
const SESSION_ID: &str = "sesionId";
const USER: &str = "user";

const TOKEN_KEYS: [&str; 5] = [ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_TYPE, EXPIRES_IN, SESSION_ID];

/// Tokens returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub sesion_id: Option<String>,
}

/// Cache key holding the last successfully saved copy of a collection.
pub fn snapshot_key(collection: &str) -> String {
    format!("snapshot:{}", collection)
}

/// Shared handle to the local store. Construct once and clone it into every
/// consumer; all clones share one database.
#[derive(Clone)]
pub struct LocalStore {
    collections: CollectionStore,
    cache: CacheLayer,
    credentials: CredentialStore,
    queue: SyncQueue,
    config: StoreConfig,
}

impl LocalStore {
    pub fn new(collections: CollectionStore, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        let cache = CacheLayer::new(collections.clone(), Arc::clone(&clock));
        let credentials = CredentialStore::new(collections.clone(), Arc::clone(&clock));
        let queue = SyncQueue::new(collections.clone(), clock, config.queue_max_retries);
        Self {
            collections,
            cache,
            credentials,
            queue,
            config,
        }
    }

    /// File-backed store at `config.database_path()` using the system clock.
    pub fn from_config(config: StoreConfig) -> Self {
        let collections = CollectionStore::open_file(config.database_path(), hostal_schema());
        Self::new(collections, Arc::new(SystemClock), config)
    }

    /// Open the database and, when configured, drop the previous session's
    /// credentials. Accessors open the database on their own; call this at
    /// startup to surface init errors early.
    pub async fn open(&self) -> Result<(), StoreError> {
        self.collections.ensure_ready().await?;
        if self.config.clear_session_on_start {
            self.start_session().await?;
        }
        Ok(())
    }

    pub fn collections(&self) -> &CollectionStore {
        &self.collections
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Start the synchronous facade over this store's cache and credentials.
    pub async fn facade(&self) -> Result<SyncFacade, StoreError> {
        SyncFacade::init(
            self.cache.clone(),
            self.credentials.clone(),
            self.config.facade_ttl_minutes,
        )
        .await
    }

    // Domain collections

    pub async fn save_cuartos(&self, cuartos: &[Cuarto]) -> Result<BatchReport, StoreError> {
        self.save_collection(cuartos).await
    }

    pub async fn get_cuartos(&self) -> Result<Vec<Cuarto>, StoreError> {
        self.load_collection().await
    }

    pub async fn get_cuartos_by_edificio(
        &self,
        edificio_id: i64,
    ) -> Result<Vec<Cuarto>, StoreError> {
        self.load_by_index("edificio_id", edificio_id, |c: &Cuarto| {
            c.edificio_id == edificio_id
        })
        .await
    }

    pub async fn get_cuartos_by_estado(&self, estado: &str) -> Result<Vec<Cuarto>, StoreError> {
        let wanted = estado.to_string();
        self.load_by_index("estado", estado, move |c: &Cuarto| {
            c.estado.as_deref() == Some(wanted.as_str())
        })
        .await
    }

    pub async fn save_mantenimientos(
        &self,
        mantenimientos: &[Mantenimiento],
    ) -> Result<BatchReport, StoreError> {
        self.save_collection(mantenimientos).await
    }

    pub async fn get_mantenimientos(&self) -> Result<Vec<Mantenimiento>, StoreError> {
        self.load_collection().await
    }

    pub async fn get_mantenimientos_by_cuarto(
        &self,
        cuarto_id: i64,
    ) -> Result<Vec<Mantenimiento>, StoreError> {
        self.load_by_index("cuarto_id", cuarto_id, |m: &Mantenimiento| {
            m.cuarto_id == cuarto_id
        })
        .await
    }

    /// Maintenance alerts scheduled for `dia` (as stored in `dia_alerta`).
    pub async fn get_alertas_for_day(&self, dia: &str) -> Result<Vec<Mantenimiento>, StoreError> {
        let wanted = dia.to_string();
        self.load_by_index("dia_alerta", dia, move |m: &Mantenimiento| {
            m.dia_alerta.as_deref() == Some(wanted.as_str())
        })
        .await
    }

    pub async fn save_edificios(&self, edificios: &[Edificio]) -> Result<BatchReport, StoreError> {
        self.save_collection(edificios).await
    }

    pub async fn get_edificios(&self) -> Result<Vec<Edificio>, StoreError> {
        self.load_collection().await
    }

    pub async fn save_usuarios(&self, usuarios: &[Usuario]) -> Result<BatchReport, StoreError> {
        self.save_collection(usuarios).await
    }

    pub async fn get_usuarios(&self) -> Result<Vec<Usuario>, StoreError> {
        self.load_collection().await
    }

    /// Replace the collection with `records` and refresh its offline snapshot.
    /// A failed snapshot write is logged; the collection write still stands.
    async fn save_collection<R: Record>(&self, records: &[R]) -> Result<BatchReport, StoreError> {
        let name = R::COLLECTION.name;
        let report = self.collections.replace_all(records).await?;
        tracing::debug!("saved {} {} records", report.succeeded(), name);

        if let Err(e) = self
            .cache
            .set_cache(
                &snapshot_key(name),
                records,
                Some(self.config.snapshot_ttl_minutes),
            )
            .await
        {
            tracing::warn!("failed to refresh {} snapshot: {}", name, e);
        }
        Ok(report)
    }

    /// Every record of the collection, or the last snapshot when the
    /// collection is empty.
    async fn load_collection<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let records = self.collections.get_all::<R>().await?;
        if !records.is_empty() {
            return Ok(records);
        }
        self.snapshot::<R>().await
    }

    /// Indexed lookup with the same snapshot fallback, filtered by `keep`.
    async fn load_by_index<R, F>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
        keep: F,
    ) -> Result<Vec<R>, StoreError>
    where
        R: Record,
        F: Fn(&R) -> bool,
    {
        if self.collections.count::<R>().await? > 0 {
            return self.collections.get_by_index::<R>(index, value).await;
        }
        Ok(self.snapshot::<R>().await?.into_iter().filter(keep).collect())
    }

    async fn snapshot<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let name = R::COLLECTION.name;
        match self.cache.get_cache::<Vec<R>>(&snapshot_key(name)).await {
            Ok(Some(records)) => {
                tracing::debug!("serving {} {} records from snapshot", records.len(), name);
                Ok(records)
            }
            Ok(None) => Ok(Vec::new()),
            Err(StoreError::Json(e)) => {
                tracing::warn!("ignoring unreadable {} snapshot: {}", name, e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    // Auth session

    /// Store login tokens, replacing every token from an earlier login.
    /// `persistent` keeps them across restarts ("remember me"); otherwise they
    /// are dropped by the next `start_session`.
    pub async fn save_auth_tokens(
        &self,
        tokens: &AuthTokens,
        persistent: bool,
    ) -> Result<(), StoreError> {
        let scope = scope_for(persistent);
        let mut entries = vec![(ACCESS_TOKEN, Value::from(tokens.access_token.clone()))];
        if let Some(refresh) = &tokens.refresh_token {
            entries.push((REFRESH_TOKEN, Value::from(refresh.clone())));
        }
        if let Some(token_type) = &tokens.token_type {
            entries.push((TOKEN_TYPE, Value::from(token_type.clone())));
        }
        if let Some(expires_in) = tokens.expires_in {
            entries.push((EXPIRES_IN, Value::from(expires_in)));
        }
        if let Some(sesion_id) = &tokens.sesion_id {
            entries.push((SESSION_ID, Value::from(sesion_id.clone())));
        }

        for key in TOKEN_KEYS {
            self.credentials.delete_auth(key).await?;
        }
        for (key, value) in entries {
            self.credentials
                .set_auth(key, value, AuthKind::Token, scope)
                .await?;
        }
        tracing::info!("saved auth tokens ({} scope)", scope.as_str());
        Ok(())
    }

    pub async fn get_access_token(&self) -> Result<Option<String>, StoreError> {
        self.get_string(ACCESS_TOKEN).await
    }

    pub async fn get_refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.get_string(REFRESH_TOKEN).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .credentials
            .get_auth(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn save_user(&self, user: &Value, persistent: bool) -> Result<(), StoreError> {
        self.credentials
            .set_auth(USER, user.clone(), AuthKind::User, scope_for(persistent))
            .await
    }

    pub async fn get_user(&self) -> Result<Option<Value>, StoreError> {
        self.credentials.get_auth(USER).await
    }

    /// Log out: remove every credential regardless of scope.
    pub async fn clear_auth(&self) -> Result<(), StoreError> {
        let removed = self.credentials.clear_all().await?;
        tracing::info!("cleared {} credentials", removed);
        Ok(())
    }

    pub async fn has_active_session(&self) -> Result<bool, StoreError> {
        Ok(self.get_access_token().await?.is_some())
    }

    /// Drop session-scoped credentials. Run once per application start.
    pub async fn start_session(&self) -> Result<usize, StoreError> {
        self.credentials.clear_scope(AuthScope::Session).await
    }

    // Sync queue

    pub async fn add_to_sync_queue(
        &self,
        kind: &str,
        endpoint: &str,
        method: &str,
        payload: Value,
    ) -> Result<i64, StoreError> {
        self.queue.enqueue(kind, endpoint, method, payload).await
    }

    pub async fn drain_sync_queue<F, Fut, E>(&self, executor: F) -> Result<DrainReport, StoreError>
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.queue.drain(executor).await
    }

    /// Prune completed entries older than the configured retention window.
    pub async fn prune_sync_queue(&self) -> Result<usize, StoreError> {
        self.queue
            .prune_completed(self.config.queue_retention_days)
            .await
    }
}

fn scope_for(persistent: bool) -> AuthScope {
    if persistent {
        AuthScope::Persistent
    } else {
        AuthScope::Session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hostal_core::ManualClock;
    use serde_json::{Map, json};

    fn make_store() -> (LocalStore, ManualClock) {
        let clock = ManualClock::default();
        let collections = CollectionStore::in_memory(hostal_schema());
        let store = LocalStore::new(
            collections,
            Arc::new(clock.clone()),
            StoreConfig::with_home("/unused"),
        );
        (store, clock)
    }

    fn cuarto(id: i64, edificio_id: i64, estado: &str) -> Cuarto {
        Cuarto {
            id,
            edificio_id,
            estado: Some(estado.to_string()),
            extra: Map::new(),
        }
    }

    fn alerta(id: i64, cuarto_id: i64, dia: &str) -> Mantenimiento {
        Mantenimiento {
            id,
            cuarto_id,
            tipo: Some("preventivo".into()),
            estado: Some("pendiente".into()),
            dia_alerta: Some(dia.to_string()),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn save_replaces_the_collection() {
        let (store, _clock) = make_store();
        store
            .save_cuartos(&[cuarto(1, 1, "libre"), cuarto(2, 1, "ocupado")])
            .await
            .unwrap();
        store.save_cuartos(&[cuarto(3, 2, "libre")]).await.unwrap();

        let ids: Vec<i64> = store.get_cuartos().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn index_accessors() {
        let (store, _clock) = make_store();
        store
            .save_cuartos(&[
                cuarto(1, 1, "libre"),
                cuarto(2, 1, "ocupado"),
                cuarto(3, 2, "libre"),
            ])
            .await
            .unwrap();
        store
            .save_mantenimientos(&[
                alerta(10, 1, "2026-10-20"),
                alerta(11, 2, "2026-10-20"),
                alerta(12, 1, "2026-10-21"),
            ])
            .await
            .unwrap();

        let in_one = store.get_cuartos_by_edificio(1).await.unwrap();
        assert_eq!(in_one.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);

        let libres = store.get_cuartos_by_estado("libre").await.unwrap();
        assert_eq!(libres.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);

        let for_room = store.get_mantenimientos_by_cuarto(1).await.unwrap();
        assert_eq!(for_room.iter().map(|m| m.id).collect::<Vec<_>>(), vec![10, 12]);

        let today = store.get_alertas_for_day("2026-10-20").await.unwrap();
        assert_eq!(today.iter().map(|m| m.id).collect::<Vec<_>>(), vec![10, 11]);
    }

    #[tokio::test]
    async fn empty_collection_falls_back_to_snapshot() {
        let (store, _clock) = make_store();
        store
            .save_edificios(&[Edificio {
                id: 1,
                extra: Map::new(),
            }])
            .await
            .unwrap();
        store
            .save_cuartos(&[cuarto(1, 1, "libre"), cuarto(2, 2, "libre")])
            .await
            .unwrap();

        store.collections().clear::<Edificio>().await.unwrap();
        store.collections().clear::<Cuarto>().await.unwrap();

        let edificios = store.get_edificios().await.unwrap();
        assert_eq!(edificios.len(), 1);
        let in_two = store.get_cuartos_by_edificio(2).await.unwrap();
        assert_eq!(in_two.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn expired_snapshot_is_not_served() {
        let (store, clock) = make_store();
        store
            .save_usuarios(&[Usuario {
                id: 1,
                rol: Some("admin".into()),
                extra: Map::new(),
            }])
            .await
            .unwrap();
        store.collections().clear::<Usuario>().await.unwrap();

        clock.advance(Duration::minutes(store.config().snapshot_ttl_minutes));
        assert!(store.get_usuarios().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remember_me_survives_a_restart() {
        let (store, _clock) = make_store();
        let tokens = AuthTokens {
            access_token: "acc".into(),
            refresh_token: Some("ref".into()),
            token_type: Some("Bearer".into()),
            expires_in: Some(3600),
            sesion_id: None,
        };
        store.save_auth_tokens(&tokens, true).await.unwrap();
        store.save_user(&json!({"id": 9}), true).await.unwrap();

        store.start_session().await.unwrap();

        assert!(store.has_active_session().await.unwrap());
        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("acc"));
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("ref"));
        assert_eq!(store.get_user().await.unwrap(), Some(json!({"id": 9})));
    }

    #[tokio::test]
    async fn session_login_ends_at_restart() {
        let (store, _clock) = make_store();
        let tokens = AuthTokens {
            access_token: "acc".into(),
            refresh_token: None,
            token_type: None,
            expires_in: None,
            sesion_id: Some("s-1".into()),
        };
        store.save_auth_tokens(&tokens, false).await.unwrap();
        assert!(store.has_active_session().await.unwrap());

        assert_eq!(store.start_session().await.unwrap(), 2);
        assert!(!store.has_active_session().await.unwrap());
    }

    #[tokio::test]
    async fn session_login_replaces_remembered_tokens() {
        let (store, _clock) = make_store();
        let remembered = AuthTokens {
            access_token: "a1".into(),
            refresh_token: Some("r1".into()),
            token_type: Some("Bearer".into()),
            expires_in: Some(3600),
            sesion_id: Some("s1".into()),
        };
        store.save_auth_tokens(&remembered, true).await.unwrap();

        let session_only = AuthTokens {
            access_token: "a2".into(),
            refresh_token: None,
            token_type: None,
            expires_in: None,
            sesion_id: None,
        };
        store.save_auth_tokens(&session_only, false).await.unwrap();
        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("a2"));
        assert!(store.get_refresh_token().await.unwrap().is_none());

        store.start_session().await.unwrap();

        assert!(!store.has_active_session().await.unwrap());
        assert!(store.get_refresh_token().await.unwrap().is_none());
        assert!(store.credentials().get_auth(SESSION_ID).await.unwrap().is_none());
        assert!(store.credentials().get_auth(TOKEN_TYPE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_auth_removes_everything() {
        let (store, _clock) = make_store();
        store.save_user(&json!({"id": 1}), true).await.unwrap();
        store
            .save_auth_tokens(
                &AuthTokens {
                    access_token: "a".into(),
                    refresh_token: None,
                    token_type: None,
                    expires_in: None,
                    sesion_id: None,
                },
                false,
            )
            .await
            .unwrap();

        store.clear_auth().await.unwrap();
        assert!(store.get_user().await.unwrap().is_none());
        assert!(!store.has_active_session().await.unwrap());
    }

    #[test]
    fn auth_tokens_use_camel_case() {
        let tokens: AuthTokens = serde_json::from_value(json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expiresIn": 60
        }))
        .unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("r"));
        assert_eq!(tokens.expires_in, Some(60));
        assert!(tokens.sesion_id.is_none());
    }

    #[tokio::test]
    async fn sync_queue_round_trip() {
        let (store, clock) = make_store();
        store
            .add_to_sync_queue("cuarto", "/cuartos/1", "PATCH", json!({"estado": "libre"}))
            .await
            .unwrap();

        let report = store
            .drain_sync_queue(|_entry| async { Ok::<(), String>(()) })
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);

        clock.advance(Duration::days(store.config().queue_retention_days + 1));
        assert_eq!(store.prune_sync_queue().await.unwrap(), 1);
    }
}
