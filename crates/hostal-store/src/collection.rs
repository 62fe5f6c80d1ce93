// ABOUTME: Async, typed collection store over the SQLite engine with a coalesced one-time open.
// ABOUTME: All accessors await readiness; each call runs as one transaction on the blocking pool.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use hostal_core::{IndexValue, Key, Record, Schema};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use crate::error::StoreError;
use crate::sqlite::{BatchOutcome, Database};

/// Where the database lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Per-record results of a best-effort batch write, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok().cloned())
            .collect()
    }
}

type SharedDatabase = Arc<Mutex<Database>>;

struct Inner {
    location: StoreLocation,
    schema: Schema,
    db: OnceCell<Result<SharedDatabase, Arc<StoreError>>>,
}

/// Shared handle to the local collection store. Cloning is cheap and every
/// clone talks to the same database; the first accessor to run opens it.
#[derive(Clone)]
pub struct CollectionStore {
    inner: Arc<Inner>,
}

impl CollectionStore {
    /// Build an unopened store. Nothing touches disk until the first call.
    pub fn new(location: StoreLocation, schema: Schema) -> Self {
        Self {
            inner: Arc::new(Inner {
                location,
                schema,
                db: OnceCell::new(),
            }),
        }
    }

    pub fn open_file(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self::new(StoreLocation::File(path.into()), schema)
    }

    pub fn in_memory(schema: Schema) -> Self {
        Self::new(StoreLocation::Memory, schema)
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.db.get(), Some(Ok(_)))
    }

    /// Open the database, or wait for an open already in flight. Concurrent
    /// callers share a single initialization. A failed open is remembered and
    /// returned to every later caller rather than retried.
    pub async fn ensure_ready(&self) -> Result<(), StoreError> {
        self.database().await.map(|_| ())
    }

    /// Open the database eagerly, logging and returning any init failure.
    pub async fn open(&self) -> Result<u32, StoreError> {
        self.ensure_ready().await?;
        self.schema_version().await
    }

    async fn database(&self) -> Result<SharedDatabase, StoreError> {
        let opened = self
            .inner
            .db
            .get_or_init(|| async move {
                let location = self.inner.location.clone();
                let schema = self.inner.schema.clone();
                tracing::info!("opening local store at {:?}", location);

                let result = tokio::task::spawn_blocking(move || match &location {
                    StoreLocation::File(path) => Database::open(path, &schema),
                    StoreLocation::Memory => Database::open_in_memory(&schema),
                })
                .await
                .map_err(StoreError::from)
                .and_then(|r| r);

                match result {
                    Ok(db) => {
                        tracing::info!("local store ready at schema version {}", db.version());
                        Ok(Arc::new(Mutex::new(db)))
                    }
                    Err(e) => {
                        tracing::error!("failed to open local store: {}", e);
                        Err(Arc::new(e))
                    }
                }
            })
            .await;

        match opened {
            Ok(db) => Ok(Arc::clone(db)),
            Err(e) => Err(StoreError::Init(Arc::clone(e))),
        }
    }

    /// Run a closure against the database on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database().await?;
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        })
        .await?
    }

    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        self.run(|db| Ok(db.version())).await
    }

    pub async fn get<R: Record>(&self, key: impl Into<Key>) -> Result<Option<R>, StoreError> {
        let key = key.into();
        let name = R::COLLECTION.name;
        let body = self.run(move |db| db.get(name, &key)).await?;
        Ok(body.map(serde_json::from_value).transpose()?)
    }

    /// Every record of the collection, in primary-key order.
    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let name = R::COLLECTION.name;
        let bodies = self.run(move |db| db.get_all(name)).await?;
        decode_all(bodies)
    }

    pub async fn get_by_index<R: Record>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> Result<Vec<R>, StoreError> {
        let name = R::COLLECTION.name;
        let index = index.to_string();
        let value = value.into();
        let bodies = self
            .run(move |db| db.get_by_index(name, &index, &value))
            .await?;
        decode_all(bodies)
    }

    pub async fn count<R: Record>(&self) -> Result<usize, StoreError> {
        let name = R::COLLECTION.name;
        self.run(move |db| db.count(name)).await
    }

    /// Upsert a record by primary key and return the key it was stored under.
    pub async fn set<R: Record>(&self, record: &R) -> Result<Key, StoreError> {
        let name = R::COLLECTION.name;
        let body = serde_json::to_value(record)?;
        let key = self.run(move |db| db.put(name, body)).await?;
        tracing::debug!("set {}/{}", name, key);
        Ok(key)
    }

    /// Best-effort batch upsert: one record failing does not abort the others.
    pub async fn set_many<R: Record>(&self, records: &[R]) -> Result<BatchReport, StoreError> {
        let name = R::COLLECTION.name;
        let bodies = encode_all(records);
        let outcomes = self.run(move |db| db.put_many(name, bodies)).await?;
        Ok(report_batch(name, outcomes))
    }

    /// Replace the whole collection with `records` in one transaction.
    pub async fn replace_all<R: Record>(&self, records: &[R]) -> Result<BatchReport, StoreError> {
        let name = R::COLLECTION.name;
        let bodies = encode_all(records);
        let outcomes = self.run(move |db| db.replace_all(name, bodies)).await?;
        Ok(report_batch(name, outcomes))
    }

    pub async fn delete<R: Record>(&self, key: impl Into<Key>) -> Result<bool, StoreError> {
        let key = key.into();
        let name = R::COLLECTION.name;
        self.run(move |db| db.delete(name, &key)).await
    }

    pub async fn clear<R: Record>(&self) -> Result<usize, StoreError> {
        let name = R::COLLECTION.name;
        self.run(move |db| db.clear(name)).await
    }

    pub async fn delete_by_index<R: Record>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> Result<usize, StoreError> {
        let name = R::COLLECTION.name;
        let index = index.to_string();
        let value = value.into();
        self.run(move |db| db.delete_by_index(name, &index, &value))
            .await
    }

    /// Delete every record matching `pred` in a single transaction. Records
    /// that no longer decode as `R` are left alone.
    pub async fn delete_where<R, P>(&self, mut pred: P) -> Result<usize, StoreError>
    where
        R: Record,
        P: FnMut(&R) -> bool + Send + 'static,
    {
        let name = R::COLLECTION.name;
        self.run(move |db| {
            db.delete_where(name, &mut |body: &serde_json::Value| {
                serde_json::from_value::<R>(body.clone())
                    .map(|r| pred(&r))
                    .unwrap_or(false)
            })
        })
        .await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run(move |db| db.get_meta(&key)).await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |db| db.set_meta(&key, &value)).await
    }
}

fn encode_all<R: Record>(records: &[R]) -> Vec<Result<serde_json::Value, String>> {
    records
        .iter()
        .map(|r| serde_json::to_value(r).map_err(|e| e.to_string()))
        .collect()
}

fn report_batch(collection: &str, outcomes: Vec<BatchOutcome>) -> BatchReport {
    let report = BatchReport { outcomes };
    if report.failed() > 0 {
        tracing::warn!(
            "batch write to {}: {} of {} records failed",
            collection,
            report.failed(),
            report.outcomes.len()
        );
    }
    report
}

fn decode_all<R: DeserializeOwned>(bodies: Vec<serde_json::Value>) -> Result<Vec<R>, StoreError> {
    bodies
        .into_iter()
        .map(|b| serde_json::from_value(b).map_err(StoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostal_core::{Cuarto, Mantenimiento, QueueEntry, hostal_schema};
    use serde_json::{Map, json};
    use tempfile::TempDir;

    fn cuarto(id: i64, edificio_id: i64, estado: &str) -> Cuarto {
        Cuarto {
            id,
            edificio_id,
            estado: Some(estado.to_string()),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn read_your_write() {
        let store = CollectionStore::in_memory(hostal_schema());
        let room = cuarto(1, 10, "disponible");

        store.set(&room).await.unwrap();

        let got: Option<Cuarto> = store.get(1).await.unwrap();
        assert_eq!(got, Some(room));
    }

    #[tokio::test]
    async fn accessors_open_the_store_transparently() {
        let store = CollectionStore::in_memory(hostal_schema());
        assert!(!store.is_ready());

        let all: Vec<Cuarto> = store.get_all().await.unwrap();
        assert!(all.is_empty());
        assert!(store.is_ready());
    }

    #[tokio::test]
    async fn concurrent_ensure_ready_shares_one_database() {
        let dir = TempDir::new().unwrap();
        let store = CollectionStore::open_file(dir.path().join("hostal.db"), hostal_schema());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.database().await.unwrap() }));
        }
        let mut dbs = Vec::new();
        for h in handles {
            dbs.push(h.await.unwrap());
        }

        for db in &dbs[1..] {
            assert!(Arc::ptr_eq(&dbs[0], db));
        }
    }

    #[tokio::test]
    async fn failed_open_is_reported_to_every_caller() {
        let dir = TempDir::new().unwrap();
        // A directory where the database file should be makes the open fail.
        let path = dir.path().join("taken");
        std::fs::create_dir_all(&path).unwrap();
        let store = CollectionStore::open_file(path, hostal_schema());

        let first = store.ensure_ready().await.unwrap_err();
        assert!(matches!(first, StoreError::Init(_)));
        let second = store.get::<Cuarto>(1).await.unwrap_err();
        assert!(matches!(second, StoreError::Init(_)));
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn get_by_index_filters_rooms_by_building() {
        let store = CollectionStore::in_memory(hostal_schema());
        store
            .set_many(&[
                cuarto(1, 10, "disponible"),
                cuarto(2, 10, "ocupado"),
                cuarto(3, 20, "disponible"),
            ])
            .await
            .unwrap();

        let in_ten: Vec<Cuarto> = store.get_by_index("edificio_id", 10).await.unwrap();
        assert_eq!(in_ten.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);

        let free: Vec<Cuarto> = store.get_by_index("estado", "disponible").await.unwrap();
        assert_eq!(free.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);

        // Index entries track updates
        store.set(&cuarto(1, 10, "ocupado")).await.unwrap();
        let free: Vec<Cuarto> = store.get_by_index("estado", "disponible").await.unwrap();
        assert_eq!(free.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn unknown_index_is_an_error() {
        let store = CollectionStore::in_memory(hostal_schema());
        let err = store
            .get_by_index::<Cuarto>("nombre", "Suite")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownIndex { .. }));
    }

    #[tokio::test]
    async fn set_assigns_auto_increment_ids() {
        let store = CollectionStore::in_memory(hostal_schema());
        let entry = QueueEntry::new(
            "cuarto.update".into(),
            "/api/cuartos/1".into(),
            "PUT".into(),
            json!({}),
            3,
            chrono::Utc::now(),
        );

        let first = store.set(&entry).await.unwrap();
        let second = store.set(&entry).await.unwrap();
        assert_eq!(first, Key::Int(1));
        assert_eq!(second, Key::Int(2));

        let stored: QueueEntry = store.get(2).await.unwrap().unwrap();
        assert_eq!(stored.id, Some(2));
    }

    #[tokio::test]
    async fn delete_clear_and_delete_where() {
        let store = CollectionStore::in_memory(hostal_schema());
        for id in 1..=5 {
            store
                .set(&Mantenimiento {
                    id,
                    cuarto_id: 1,
                    tipo: Some(if id % 2 == 0 { "preventivo" } else { "correctivo" }.into()),
                    estado: None,
                    dia_alerta: None,
                    extra: Map::new(),
                })
                .await
                .unwrap();
        }

        assert!(store.delete::<Mantenimiento>(1).await.unwrap());
        assert!(!store.delete::<Mantenimiento>(1).await.unwrap());

        let removed = store
            .delete_where::<Mantenimiento, _>(|m| m.tipo.as_deref() == Some("preventivo"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count::<Mantenimiento>().await.unwrap(), 2);

        assert_eq!(store.clear::<Mantenimiento>().await.unwrap(), 2);
        assert_eq!(store.count::<Mantenimiento>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostal.db");

        {
            let store = CollectionStore::open_file(&path, hostal_schema());
            store.set(&cuarto(7, 1, "mantenimiento")).await.unwrap();
            store.set_meta("migrated", "true").await.unwrap();
        }

        let store = CollectionStore::open_file(&path, hostal_schema());
        let room: Option<Cuarto> = store.get(7).await.unwrap();
        assert_eq!(room.unwrap().estado.as_deref(), Some("mantenimiento"));
        assert_eq!(store.get_meta("migrated").await.unwrap().as_deref(), Some("true"));
        assert_eq!(store.schema_version().await.unwrap(), 1);
    }
}
