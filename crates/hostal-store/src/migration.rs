// ABOUTME: One-time import of legacy flat key/value data into the typed store, guarded by a meta flag.
// ABOUTME: Bad legacy values are skipped and reported; storage failures leave the flag unset for a retry.

use std::collections::HashMap;
use std::path::Path;

use hostal_core::{AuthKind, AuthScope, Cuarto, Edificio, Mantenimiento, Usuario};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::StoreError;
use crate::local::LocalStore;

/// Meta key recording that the legacy import has completed.
pub const MIGRATED_FLAG: &str = "migrated";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("legacy data is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("legacy data must be a JSON object of key/value pairs")]
    NotAnObject,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Flat string key/value storage the application used before the store.
pub trait LegacySource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Legacy data held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    values: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl LegacySource for MemorySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Legacy data exported as a single JSON object. String members are taken
/// verbatim; any other member is re-encoded as JSON text.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    inner: MemorySource,
}

impl JsonFileSource {
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let data = std::fs::read_to_string(path)?;
        let Value::Object(map) = serde_json::from_str::<Value>(&data)? else {
            return Err(MigrationError::NotAnObject);
        };
        let inner = map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        Ok(Self { inner })
    }
}

impl LegacySource for JsonFileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyKind {
    Credential(AuthKind),
    Preference,
    Usuarios,
    Edificios,
    Cuartos,
    Mantenimientos,
}

/// Every key the legacy storage is known to hold.
const LEGACY_KEYS: &[(&str, LegacyKind)] = &[
    ("accessToken", LegacyKind::Credential(AuthKind::Token)),
    ("refreshToken", LegacyKind::Credential(AuthKind::Token)),
    ("tokenType", LegacyKind::Credential(AuthKind::Token)),
    ("expiresIn", LegacyKind::Credential(AuthKind::Token)),
    ("sesionId", LegacyKind::Credential(AuthKind::Token)),
    ("user", LegacyKind::Credential(AuthKind::User)),
    ("theme", LegacyKind::Preference),
    ("language", LegacyKind::Preference),
    ("sidebarCollapsed", LegacyKind::Preference),
    ("lastSyncAt", LegacyKind::Preference),
    ("usuarios", LegacyKind::Usuarios),
    ("edificios", LegacyKind::Edificios),
    ("cuartos", LegacyKind::Cuartos),
    ("mantenimientos", LegacyKind::Mantenimientos),
];

/// Result of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// The flag was already set; nothing was read.
    pub already_migrated: bool,
    /// The flag is set after this run.
    pub completed: bool,
    pub imported: Vec<String>,
    /// (key, reason) for every legacy key that could not be imported.
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.imported.is_empty() && self.failed.is_empty()
    }
}

enum ImportFailure {
    /// The legacy value itself is bad. Retrying cannot help.
    Invalid(String),
    Store(StoreError),
}

impl From<StoreError> for ImportFailure {
    fn from(e: StoreError) -> Self {
        ImportFailure::Store(e)
    }
}

pub struct MigrationRunner {
    store: LocalStore,
}

impl MigrationRunner {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn is_migrated(&self) -> Result<bool, StoreError> {
        let flag = self.store.collections().get_meta(MIGRATED_FLAG).await?;
        Ok(flag.as_deref() == Some("true"))
    }

    /// Import every known legacy key, once. Later runs return immediately.
    pub async fn run(&self, source: &dyn LegacySource) -> Result<MigrationReport, MigrationError> {
        if self.is_migrated().await? {
            tracing::debug!("legacy migration already completed");
            return Ok(MigrationReport {
                already_migrated: true,
                completed: true,
                ..MigrationReport::default()
            });
        }

        let mut report = MigrationReport::default();
        let mut retry_needed = false;

        for (key, kind) in LEGACY_KEYS {
            let Some(raw) = source.get(key) else {
                continue;
            };
            match self.import(key, *kind, &raw).await {
                Ok(()) => report.imported.push(key.to_string()),
                Err(ImportFailure::Invalid(reason)) => {
                    tracing::warn!("skipping legacy key {}: {}", key, reason);
                    report.failed.push((key.to_string(), reason));
                }
                Err(ImportFailure::Store(e)) => {
                    tracing::warn!("failed to import legacy key {}: {}", key, e);
                    report.failed.push((key.to_string(), e.to_string()));
                    retry_needed = true;
                }
            }
        }

        if retry_needed {
            tracing::warn!("legacy migration incomplete; it will run again next start");
        } else {
            self.store
                .collections()
                .set_meta(MIGRATED_FLAG, "true")
                .await?;
            report.completed = true;
        }

        tracing::info!(
            "legacy migration: {} imported, {} failed",
            report.imported.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn import(&self, key: &str, kind: LegacyKind, raw: &str) -> Result<(), ImportFailure> {
        match kind {
            LegacyKind::Credential(AuthKind::User) => {
                let user = parse_strict::<Value>(raw)?;
                if !user.is_object() {
                    return Err(ImportFailure::Invalid("user is not an object".to_string()));
                }
                self.store
                    .credentials()
                    .set_auth(key, user, AuthKind::User, AuthScope::Persistent)
                    .await?;
            }
            LegacyKind::Credential(kind) => {
                self.store
                    .credentials()
                    .set_auth(key, parse_loose(raw), kind, AuthScope::Persistent)
                    .await?;
            }
            LegacyKind::Preference => {
                self.store
                    .cache()
                    .set_cache_value(key, parse_loose(raw), None)
                    .await?;
            }
            LegacyKind::Usuarios => {
                let records = parse_strict::<Vec<Usuario>>(raw)?;
                self.store.save_usuarios(&records).await?;
            }
            LegacyKind::Edificios => {
                let records = parse_strict::<Vec<Edificio>>(raw)?;
                self.store.save_edificios(&records).await?;
            }
            LegacyKind::Cuartos => {
                let records = parse_strict::<Vec<Cuarto>>(raw)?;
                self.store.save_cuartos(&records).await?;
            }
            LegacyKind::Mantenimientos => {
                let records = parse_strict::<Vec<Mantenimiento>>(raw)?;
                self.store.save_mantenimientos(&records).await?;
            }
        }
        Ok(())
    }
}

fn parse_strict<T: DeserializeOwned>(raw: &str) -> Result<T, ImportFailure> {
    serde_json::from_str(raw).map_err(|e| ImportFailure::Invalid(e.to_string()))
}

/// Legacy scalars were written both JSON-encoded and as bare strings.
fn parse_loose(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
