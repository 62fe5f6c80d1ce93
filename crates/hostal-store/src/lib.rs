// ABOUTME: Persistence layer for hostal, backed by a single SQLite database.
// ABOUTME: Provides the collection store, TTL cache, scoped credentials, sync queue, facade and migration.

pub mod cache;
pub mod collection;
pub mod config;
pub mod credentials;
pub mod error;
pub mod facade;
pub mod local;
pub mod migration;
pub mod queue;
pub mod sqlite;

pub use cache::CacheLayer;
pub use collection::{BatchReport, CollectionStore, StoreLocation};
pub use config::{ConfigError, StoreConfig};
pub use credentials::CredentialStore;
pub use error::StoreError;
pub use facade::{DEFAULT_FACADE_TTL_MINUTES, SyncFacade, credential_kind};
pub use local::{AuthTokens, LocalStore, snapshot_key};
pub use migration::{
    JsonFileSource, LegacySource, MIGRATED_FLAG, MemorySource, MigrationError, MigrationReport,
    MigrationRunner,
};
pub use queue::{DEFAULT_MAX_RETRIES, DrainReport, QueueStats, SyncQueue};
pub use sqlite::Database;
