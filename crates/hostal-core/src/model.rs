// ABOUTME: Domain records for users, buildings, rooms and maintenance tickets.
// ABOUTME: Payloads stay opaque: fields the store does not index are preserved in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{CollectionDef, IndexDef, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usuario {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rol: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Usuario {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "usuarios",
        key_path: "id",
        auto_increment: false,
        indexes: &[IndexDef::new("rol", "rol")],
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edificio {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Edificio {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "edificios",
        key_path: "id",
        auto_increment: false,
        indexes: &[],
    };
}

/// A hotel room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cuarto {
    pub id: i64,
    pub edificio_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estado: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Cuarto {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "cuartos",
        key_path: "id",
        auto_increment: false,
        indexes: &[
            IndexDef::new("edificio_id", "edificio_id"),
            IndexDef::new("estado", "estado"),
        ],
    };
}

/// A maintenance ticket or scheduled alert attached to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mantenimiento {
    pub id: i64,
    pub cuarto_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estado: Option<String>,
    /// Day the alert fires, as the application formats it (e.g. `2024-05-01`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dia_alerta: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Mantenimiento {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "mantenimientos",
        key_path: "id",
        auto_increment: false,
        indexes: &[
            IndexDef::new("cuarto_id", "cuarto_id"),
            IndexDef::new("tipo", "tipo"),
            IndexDef::new("estado", "estado"),
            IndexDef::new("dia_alerta", "dia_alerta"),
        ],
    };
}
