// ABOUTME: Core library for hostal, containing record types and collection schema declarations.
// ABOUTME: This crate defines the shared data model used by the store and its consumers.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod key;
pub mod model;
pub mod queue;
pub mod schema;

pub use auth::{AuthKind, AuthRecord, AuthScope};
pub use cache::{CacheRecord, expiry_deadline};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{IndexValue, Key};
pub use model::{Cuarto, Edificio, Mantenimiento, Usuario};
pub use queue::{QueueEntry, QueueStatus};
pub use schema::{CollectionDef, IndexDef, Record, SCHEMA_VERSION, Schema, hostal_schema};
