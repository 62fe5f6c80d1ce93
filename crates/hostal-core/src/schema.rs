// ABOUTME: Static collection schema declarations: primary key path, auto-increment, secondary indexes.
// ABOUTME: Also defines the Record trait binding each typed record to its collection.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::AuthRecord;
use crate::cache::CacheRecord;
use crate::model::{Cuarto, Edificio, Mantenimiento, Usuario};
use crate::queue::QueueEntry;

/// Current schema version of the hostal database.
pub const SCHEMA_VERSION: u32 = 1;

/// A non-unique secondary index over one field of a collection's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub key_path: &'static str,
}

impl IndexDef {
    pub const fn new(name: &'static str, key_path: &'static str) -> Self {
        Self { name, key_path }
    }
}

/// Declaration of a named collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: &'static str,
    /// Dotted path to the primary key field inside a record body.
    pub key_path: &'static str,
    /// When set, records without a key are assigned the next integer id.
    pub auto_increment: bool,
    pub indexes: &'static [IndexDef],
}

impl CollectionDef {
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}

/// A typed record stored in exactly one collection.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const COLLECTION: &'static CollectionDef;
}

/// A versioned set of collection declarations handed to the store on open.
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: u32,
    pub collections: Vec<CollectionDef>,
}

impl Schema {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            collections: Vec::new(),
        }
    }

    pub fn with(mut self, def: &CollectionDef) -> Self {
        self.collections.push(*def);
        self
    }

    pub fn with_record<R: Record>(self) -> Self {
        self.with(R::COLLECTION)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// The schema of the hostal store: credentials, cache, domain collections and the sync queue.
pub fn hostal_schema() -> Schema {
    Schema::new(SCHEMA_VERSION)
        .with_record::<AuthRecord>()
        .with_record::<CacheRecord>()
        .with_record::<Usuario>()
        .with_record::<Edificio>()
        .with_record::<Cuarto>()
        .with_record::<Mantenimiento>()
        .with_record::<QueueEntry>()
}

/// Resolve a dotted key path (`"a.b.c"`) against a JSON value.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}
