// ABOUTME: Credential records for the auth collection, scoped as persistent or session-only.
// ABOUTME: Session-scoped records are cleared on restart; persistent ones implement "remember me".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{CollectionDef, IndexDef, Record};

/// What a credential record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Token,
    User,
}

/// How long a credential survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScope {
    Persistent,
    Session,
}

impl AuthScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScope::Persistent => "persistent",
            AuthScope::Session => "session",
        }
    }
}

/// A stored credential. No TTL applies; records live until deleted or scope-cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub key: String,
    pub value: Value,
    pub kind: AuthKind,
    pub scope: AuthScope,
    pub written_at: DateTime<Utc>,
}

impl Record for AuthRecord {
    const COLLECTION: &'static CollectionDef = &CollectionDef {
        name: "auth",
        key_path: "key",
        auto_increment: false,
        indexes: &[IndexDef::new("scope", "scope"), IndexDef::new("kind", "kind")],
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_record_serializes_scope_as_snake_case() {
        let record = AuthRecord {
            key: "accessToken".to_string(),
            value: json!("abc"),
            kind: AuthKind::Token,
            scope: AuthScope::Session,
            written_at: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["scope"], json!("session"));
        assert_eq!(value["kind"], json!("token"));
        assert_eq!(AuthScope::Session.as_str(), "session");
    }
}
