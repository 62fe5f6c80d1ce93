// ABOUTME: Synchronous SQLite engine behind the collection store: schema registry, records, index entries.
// ABOUTME: Every mutating call is one transaction; index entries are re-derived on each write.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use hostal_core::schema::resolve_path;
use hostal_core::{IndexValue, Key, Schema};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::Value;

use crate::error::StoreError;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A collection as registered in the database (not as declared in code).
#[derive(Debug, Clone)]
struct CollectionMeta {
    key_path: String,
    auto_increment: bool,
    /// (index name, key path)
    indexes: Vec<(String, String)>,
}

/// Outcome of one record in a best-effort batch write.
pub type BatchOutcome = Result<Key, String>;

/// The SQLite database holding every collection. Records are stored as JSON
/// bodies keyed by (collection, primary key); secondary index entries live in
/// a separate table and are rebuilt whenever their record is written.
pub struct Database {
    conn: Connection,
    registry: HashMap<String, CollectionMeta>,
    version: u32,
}

impl Database {
    /// Open or create the database at the given path and bring its schema up
    /// to `schema.version`. Creates parent directories if they do not exist.
    pub fn open(path: &Path, schema: &Schema) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::bootstrap(conn, schema)
    }

    /// Create an in-memory database. Data is lost when it is dropped.
    pub fn open_in_memory(schema: &Schema) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, schema)
    }

    fn bootstrap(mut conn: Connection, schema: &Schema) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                key_path TEXT NOT NULL,
                auto_increment INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS indexes (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                key_path TEXT NOT NULL,
                PRIMARY KEY (collection, name)
            );

            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                pk NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, pk)
            );

            CREATE TABLE IF NOT EXISTS index_entries (
                collection TEXT NOT NULL,
                index_name TEXT NOT NULL,
                value NOT NULL,
                pk NOT NULL,
                PRIMARY KEY (collection, index_name, value, pk)
            );

            CREATE INDEX IF NOT EXISTS idx_index_entries_pk ON index_entries(collection, pk);

            CREATE TABLE IF NOT EXISTS sequences (
                collection TEXT PRIMARY KEY,
                next_id INTEGER NOT NULL
            );",
        )?;

        let stored = read_version(&conn)?;
        if stored > schema.version {
            return Err(StoreError::VersionDowngrade {
                stored,
                requested: schema.version,
            });
        }

        if stored < schema.version {
            tracing::info!(
                "upgrading store schema from version {} to {}",
                stored,
                schema.version
            );
            let tx = conn.transaction()?;
            for def in &schema.collections {
                let created = tx.execute(
                    "INSERT OR IGNORE INTO collections (name, key_path, auto_increment)
                     VALUES (?1, ?2, ?3)",
                    params![def.name, def.key_path, def.auto_increment],
                )?;
                if created > 0 {
                    tracing::debug!("created collection {}", def.name);
                }
                for index in def.indexes {
                    tx.execute(
                        "INSERT OR IGNORE INTO indexes (collection, name, key_path)
                         VALUES (?1, ?2, ?3)",
                        params![def.name, index.name, index.key_path],
                    )?;
                }
            }
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION_KEY, schema.version.to_string()],
            )?;
            tx.commit()?;
        }

        let registry = load_registry(&conn)?;
        Ok(Self {
            conn,
            registry,
            version: schema.version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    pub fn get(&self, collection: &str, key: &Key) -> Result<Option<Value>, StoreError> {
        lookup(&self.registry, collection)?;
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND pk = ?2",
                params![collection, key_to_sql(key)],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(StoreError::from)
    }

    /// All records of a collection in primary-key order.
    pub fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        lookup(&self.registry, collection)?;
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY pk ASC")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut bodies = Vec::new();
        for row in rows {
            bodies.push(serde_json::from_str(&row?)?);
        }
        Ok(bodies)
    }

    /// Records whose indexed field equals `value`, in primary-key order.
    pub fn get_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &IndexValue,
    ) -> Result<Vec<Value>, StoreError> {
        let meta = lookup(&self.registry, collection)?;
        check_index(meta, collection, index)?;

        let mut stmt = self.conn.prepare(
            "SELECT r.body FROM index_entries e
             JOIN records r ON r.collection = e.collection AND r.pk = e.pk
             WHERE e.collection = ?1 AND e.index_name = ?2 AND e.value = ?3
             ORDER BY e.pk ASC",
        )?;
        let rows = stmt.query_map(
            params![collection, index, index_to_sql(value)],
            |row| row.get::<_, String>(0),
        )?;

        let mut bodies = Vec::new();
        for row in rows {
            bodies.push(serde_json::from_str(&row?)?);
        }
        Ok(bodies)
    }

    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        lookup(&self.registry, collection)?;
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Upsert one record by primary key.
    pub fn put(&mut self, collection: &str, body: Value) -> Result<Key, StoreError> {
        let meta = lookup(&self.registry, collection)?;
        let tx = self.conn.transaction()?;
        let key = put_record(&tx, collection, meta, body)?;
        tx.commit()?;
        Ok(key)
    }

    /// Best-effort batch upsert. Each record is written inside its own
    /// savepoint; a failing record is rolled back alone and reported.
    pub fn put_many(
        &mut self,
        collection: &str,
        bodies: Vec<Result<Value, String>>,
    ) -> Result<Vec<BatchOutcome>, StoreError> {
        let meta = lookup(&self.registry, collection)?;
        let mut tx = self.conn.transaction()?;
        let outcomes = write_batch(&mut tx, collection, meta, bodies)?;
        tx.commit()?;
        Ok(outcomes)
    }

    /// Empty the collection and write `bodies` in its place, all in one
    /// transaction. Individual records may still fail as in `put_many`.
    pub fn replace_all(
        &mut self,
        collection: &str,
        bodies: Vec<Result<Value, String>>,
    ) -> Result<Vec<BatchOutcome>, StoreError> {
        let meta = lookup(&self.registry, collection)?;
        let mut tx = self.conn.transaction()?;
        clear_collection(&tx, collection)?;
        let outcomes = write_batch(&mut tx, collection, meta, bodies)?;
        tx.commit()?;
        Ok(outcomes)
    }

    pub fn delete(&mut self, collection: &str, key: &Key) -> Result<bool, StoreError> {
        lookup(&self.registry, collection)?;
        let tx = self.conn.transaction()?;
        let removed = delete_record(&tx, collection, &key_to_sql(key))?;
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every record of a collection. Returns how many were removed.
    pub fn clear(&mut self, collection: &str) -> Result<usize, StoreError> {
        lookup(&self.registry, collection)?;
        let tx = self.conn.transaction()?;
        let removed = clear_collection(&tx, collection)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every record whose indexed field equals `value`.
    pub fn delete_by_index(
        &mut self,
        collection: &str,
        index: &str,
        value: &IndexValue,
    ) -> Result<usize, StoreError> {
        let meta = lookup(&self.registry, collection)?;
        check_index(meta, collection, index)?;

        let tx = self.conn.transaction()?;
        let pks = {
            let mut stmt = tx.prepare(
                "SELECT pk FROM index_entries
                 WHERE collection = ?1 AND index_name = ?2 AND value = ?3",
            )?;
            let rows = stmt.query_map(params![collection, index, index_to_sql(value)], |row| {
                row.get::<_, SqlValue>(0)
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut removed = 0;
        for pk in &pks {
            if delete_record(&tx, collection, pk)? {
                removed += 1;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every record for which `pred` returns true, in one transaction.
    pub fn delete_where(
        &mut self,
        collection: &str,
        pred: &mut dyn FnMut(&Value) -> bool,
    ) -> Result<usize, StoreError> {
        lookup(&self.registry, collection)?;
        let tx = self.conn.transaction()?;
        let doomed = {
            let mut stmt = tx.prepare("SELECT pk, body FROM records WHERE collection = ?1")?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, SqlValue>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut doomed = Vec::new();
            for row in rows {
                let (pk, body) = row?;
                let body: Value = serde_json::from_str(&body)?;
                if pred(&body) {
                    doomed.push(pk);
                }
            }
            doomed
        };

        let mut removed = 0;
        for pk in &doomed {
            if delete_record(&tx, collection, pk)? {
                removed += 1;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn lookup<'a>(
    registry: &'a HashMap<String, CollectionMeta>,
    collection: &str,
) -> Result<&'a CollectionMeta, StoreError> {
    registry
        .get(collection)
        .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
}

fn check_index(meta: &CollectionMeta, collection: &str, index: &str) -> Result<(), StoreError> {
    if meta.indexes.iter().any(|(name, _)| name == index) {
        Ok(())
    } else {
        Err(StoreError::UnknownIndex {
            collection: collection.to_string(),
            index: index.to_string(),
        })
    }
}

fn read_version(conn: &Connection) -> Result<u32, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0))
}

fn load_registry(conn: &Connection) -> Result<HashMap<String, CollectionMeta>, StoreError> {
    let mut registry = HashMap::new();

    let mut collections =
        conn.prepare("SELECT name, key_path, auto_increment FROM collections")?;
    let rows = collections.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;
    for row in rows {
        let (name, key_path, auto_increment) = row?;
        registry.insert(
            name,
            CollectionMeta {
                key_path,
                auto_increment,
                indexes: Vec::new(),
            },
        );
    }

    let mut indexes =
        conn.prepare("SELECT collection, name, key_path FROM indexes ORDER BY collection, name")?;
    let rows = indexes.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (collection, name, key_path) = row?;
        if let Some(meta) = registry.get_mut(&collection) {
            meta.indexes.push((name, key_path));
        }
    }

    Ok(registry)
}

/// Write a record and re-derive its index entries. Runs inside the caller's
/// transaction or savepoint.
fn put_record(
    conn: &Connection,
    collection: &str,
    meta: &CollectionMeta,
    mut body: Value,
) -> Result<Key, StoreError> {
    let missing_key = || StoreError::MissingKey {
        collection: collection.to_string(),
        key_path: meta.key_path.clone(),
    };

    let key = match resolve_path(&body, &meta.key_path).and_then(Key::from_json) {
        Some(key) => key,
        None if meta.auto_increment && !meta.key_path.contains('.') => {
            let id = next_id(conn, collection)?;
            let object = body.as_object_mut().ok_or_else(missing_key)?;
            object.insert(meta.key_path.clone(), Value::from(id));
            Key::Int(id)
        }
        None => return Err(missing_key()),
    };

    if meta.auto_increment
        && let Key::Int(id) = key
    {
        // Explicit ids must never be handed out again by the sequence.
        conn.execute(
            "INSERT INTO sequences (collection, next_id) VALUES (?1, ?2)
             ON CONFLICT(collection) DO UPDATE SET next_id = MAX(next_id, excluded.next_id)",
            params![collection, id + 1],
        )?;
    }

    let pk = key_to_sql(&key);
    conn.execute(
        "INSERT INTO records (collection, pk, body) VALUES (?1, ?2, ?3)
         ON CONFLICT(collection, pk) DO UPDATE SET body = excluded.body",
        params![collection, pk, serde_json::to_string(&body)?],
    )?;

    conn.execute(
        "DELETE FROM index_entries WHERE collection = ?1 AND pk = ?2",
        params![collection, pk],
    )?;
    for (index, key_path) in &meta.indexes {
        if let Some(value) = resolve_path(&body, key_path).and_then(IndexValue::from_json) {
            conn.execute(
                "INSERT OR IGNORE INTO index_entries (collection, index_name, value, pk)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, index, index_to_sql(&value), pk],
            )?;
        }
    }

    Ok(key)
}

/// Each record gets its own savepoint so one bad record does not roll back
/// the rest of the batch.
fn write_batch(
    tx: &mut Transaction<'_>,
    collection: &str,
    meta: &CollectionMeta,
    bodies: Vec<Result<Value, String>>,
) -> Result<Vec<BatchOutcome>, StoreError> {
    let mut outcomes = Vec::with_capacity(bodies.len());
    for body in bodies {
        let body = match body {
            Ok(body) => body,
            Err(reason) => {
                outcomes.push(Err(reason));
                continue;
            }
        };
        let sp = tx.savepoint()?;
        match put_record(&sp, collection, meta, body) {
            Ok(key) => {
                sp.commit()?;
                outcomes.push(Ok(key));
            }
            Err(e) => {
                // Dropping the savepoint rolls it back.
                drop(sp);
                outcomes.push(Err(e.to_string()));
            }
        }
    }
    Ok(outcomes)
}

fn clear_collection(conn: &Connection, collection: &str) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM index_entries WHERE collection = ?1",
        params![collection],
    )?;
    Ok(conn.execute("DELETE FROM records WHERE collection = ?1", params![collection])?)
}

fn delete_record(conn: &Connection, collection: &str, pk: &SqlValue) -> Result<bool, StoreError> {
    conn.execute(
        "DELETE FROM index_entries WHERE collection = ?1 AND pk = ?2",
        params![collection, pk],
    )?;
    let removed = conn.execute(
        "DELETE FROM records WHERE collection = ?1 AND pk = ?2",
        params![collection, pk],
    )?;
    Ok(removed > 0)
}

/// Allocate the next id of an auto-increment collection. Ids are never reused.
fn next_id(conn: &Connection, collection: &str) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO sequences (collection, next_id) VALUES (?1, 1)",
        params![collection],
    )?;
    let id: i64 = conn.query_row(
        "SELECT next_id FROM sequences WHERE collection = ?1",
        params![collection],
        |row| row.get(0),
    )?;
    conn.execute(
        "UPDATE sequences SET next_id = next_id + 1 WHERE collection = ?1",
        params![collection],
    )?;
    Ok(id)
}

fn key_to_sql(key: &Key) -> SqlValue {
    match key {
        Key::Int(i) => SqlValue::Integer(*i),
        Key::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn index_to_sql(value: &IndexValue) -> SqlValue {
    match value {
        IndexValue::Int(i) => SqlValue::Integer(*i),
        IndexValue::Real(f) => SqlValue::Real(*f),
        IndexValue::Text(s) => SqlValue::Text(s.clone()),
        IndexValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostal_core::schema::{CollectionDef, IndexDef};
    use serde_json::json;
    use tempfile::TempDir;

    const ROOMS: CollectionDef = CollectionDef {
        name: "rooms",
        key_path: "id",
        auto_increment: false,
        indexes: &[IndexDef::new("floor", "floor")],
    };

    const LOG: CollectionDef = CollectionDef {
        name: "log",
        key_path: "id",
        auto_increment: true,
        indexes: &[],
    };

    const ROOMS_V2: CollectionDef = CollectionDef {
        name: "rooms",
        key_path: "id",
        auto_increment: false,
        indexes: &[IndexDef::new("floor", "floor"), IndexDef::new("wing", "wing")],
    };

    fn schema() -> Schema {
        Schema::new(1).with(&ROOMS).with(&LOG)
    }

    #[test]
    fn put_then_get_returns_written_body() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        let key = db.put("rooms", json!({"id": 1, "floor": 2})).unwrap();
        assert_eq!(key, Key::Int(1));

        let body = db.get("rooms", &Key::Int(1)).unwrap().unwrap();
        assert_eq!(body, json!({"id": 1, "floor": 2}));
        assert!(db.get("rooms", &Key::Int(99)).unwrap().is_none());
    }

    #[test]
    fn index_entries_follow_record_state() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        db.put("rooms", json!({"id": 1, "floor": 2})).unwrap();
        db.put("rooms", json!({"id": 2, "floor": 2})).unwrap();

        let on_two = db.get_by_index("rooms", "floor", &IndexValue::Int(2)).unwrap();
        assert_eq!(on_two.len(), 2);

        // Moving room 1 must drop its old entry
        db.put("rooms", json!({"id": 1, "floor": 5})).unwrap();
        let on_two = db.get_by_index("rooms", "floor", &IndexValue::Int(2)).unwrap();
        assert_eq!(on_two, vec![json!({"id": 2, "floor": 2})]);
        let on_five = db.get_by_index("rooms", "floor", &IndexValue::Int(5)).unwrap();
        assert_eq!(on_five.len(), 1);

        db.delete("rooms", &Key::Int(2)).unwrap();
        assert!(db.get_by_index("rooms", "floor", &IndexValue::Int(2)).unwrap().is_empty());
    }

    #[test]
    fn auto_increment_assigns_monotonic_ids() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        let a = db.put("log", json!({"msg": "a"})).unwrap();
        let b = db.put("log", json!({"msg": "b"})).unwrap();
        assert_eq!(a, Key::Int(1));
        assert_eq!(b, Key::Int(2));

        let stored = db.get("log", &b).unwrap().unwrap();
        assert_eq!(stored["id"], json!(2));

        // Deleted ids are not reused, explicit ids push the sequence forward
        db.delete("log", &b).unwrap();
        db.put("log", json!({"id": 10, "msg": "explicit"})).unwrap();
        let c = db.put("log", json!({"msg": "c"})).unwrap();
        assert_eq!(c, Key::Int(11));
    }

    #[test]
    fn missing_key_is_rejected_without_auto_increment() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        let err = db.put("rooms", json!({"floor": 1})).unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
    }

    #[test]
    fn unknown_collection_and_index_are_errors() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        assert!(matches!(
            db.put("nope", json!({"id": 1})),
            Err(StoreError::UnknownCollection(_))
        ));
        assert!(matches!(
            db.get_by_index("rooms", "wing", &IndexValue::Int(1)),
            Err(StoreError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn put_many_isolates_failures() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        let outcomes = db
            .put_many(
                "rooms",
                vec![
                    Ok(json!({"id": 1, "floor": 1})),
                    Ok(json!({"floor": 9})),
                    Err("not serializable".to_string()),
                    Ok(json!({"id": 3, "floor": 1})),
                ],
            )
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_err());
        assert!(outcomes[3].is_ok());
        assert_eq!(db.count("rooms").unwrap(), 2);
    }

    #[test]
    fn replace_all_swaps_the_collection_contents() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        db.put("rooms", json!({"id": 1, "floor": 1})).unwrap();
        db.put("rooms", json!({"id": 2, "floor": 2})).unwrap();

        let outcomes = db
            .replace_all("rooms", vec![Ok(json!({"id": 7, "floor": 2}))])
            .unwrap();
        assert_eq!(outcomes, vec![Ok(Key::Int(7))]);

        assert_eq!(db.get_all("rooms").unwrap(), vec![json!({"id": 7, "floor": 2})]);
        let floor_two = db
            .get_by_index("rooms", "floor", &IndexValue::Int(2))
            .unwrap();
        assert_eq!(floor_two.len(), 1);
    }

    #[test]
    fn delete_by_index_and_delete_where() {
        let mut db = Database::open_in_memory(&schema()).unwrap();
        for id in 1..=4 {
            db.put("rooms", json!({"id": id, "floor": id % 2})).unwrap();
        }

        let removed = db.delete_by_index("rooms", "floor", &IndexValue::Int(0)).unwrap();
        assert_eq!(removed, 2);

        let removed = db
            .delete_where("rooms", &mut |body: &Value| body["id"] == json!(3))
            .unwrap();
        assert_eq!(removed, 1);

        let left = db.get_all("rooms").unwrap();
        assert_eq!(left, vec![json!({"id": 1, "floor": 1})]);
    }

    #[test]
    fn schema_upgrade_is_additive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        {
            let mut db = Database::open(&path, &schema()).unwrap();
            db.put("rooms", json!({"id": 1, "floor": 1, "wing": "east"})).unwrap();
        }

        let v2 = Schema::new(2).with(&ROOMS_V2).with(&LOG);
        let mut db = Database::open(&path, &v2).unwrap();
        assert_eq!(db.version(), 2);

        // Existing data survives, the new index is not back-filled
        assert!(db.get("rooms", &Key::Int(1)).unwrap().is_some());
        let east = db
            .get_by_index("rooms", "wing", &IndexValue::from("east"))
            .unwrap();
        assert!(east.is_empty());

        db.put("rooms", json!({"id": 1, "floor": 1, "wing": "east"})).unwrap();
        let east = db
            .get_by_index("rooms", "wing", &IndexValue::from("east"))
            .unwrap();
        assert_eq!(east.len(), 1);
    }

    #[test]
    fn opening_with_older_version_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        Database::open(&path, &Schema::new(3).with(&ROOMS)).unwrap();

        let err = Database::open(&path, &Schema::new(2).with(&ROOMS)).err().unwrap();
        assert!(matches!(
            err,
            StoreError::VersionDowngrade {
                stored: 3,
                requested: 2
            }
        ));
    }

    #[test]
    fn meta_round_trip() {
        let db = Database::open_in_memory(&schema()).unwrap();
        assert_eq!(db.get_meta("migrated").unwrap(), None);
        db.set_meta("migrated", "true").unwrap();
        assert_eq!(db.get_meta("migrated").unwrap().as_deref(), Some("true"));
        assert_eq!(db.get_meta("schema_version").unwrap().as_deref(), Some("1"));
    }
}
