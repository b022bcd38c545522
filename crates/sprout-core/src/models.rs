//! Data models for Sprout
//!
//! Task items, connectivity reports and the signed-in identity.
//! Items are stored as schemaless documents; the conversions here define the
//! persisted field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::store::Document;

/// Field holding the item text
pub const FIELD_TEXT: &str = "text";
/// Field holding the owner's uid; owner-scoped queries filter on it
pub const FIELD_OWNER: &str = "userId";
/// Field holding the completion flag
pub const FIELD_COMPLETED: &str = "completed";
/// Server-assigned creation timestamp
pub const FIELD_CREATED_AT: &str = "createdAt";
/// Server-assigned update timestamp
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// A task item owned by exactly one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Store-assigned identifier
    pub id: String,
    /// Task text
    pub text: String,
    /// Owner uid
    pub owner_id: String,
    /// Whether the task is done
    pub completed: bool,
    /// Creation time (local estimate until the server acknowledges)
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time (local estimate until the server acknowledges)
    pub updated_at: Option<DateTime<Utc>>,
    /// Local writes to this item are not yet acknowledged
    pub pending: bool,
}

impl Item {
    /// Build an item from a stored document
    ///
    /// Returns `None` when required fields are missing or mistyped.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let text = doc.fields.get(FIELD_TEXT)?.as_str()?.to_string();
        let owner_id = doc.fields.get(FIELD_OWNER)?.as_str()?.to_string();
        let completed = doc
            .fields
            .get(FIELD_COMPLETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(Self {
            id: doc.id.clone(),
            text,
            owner_id,
            completed,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            pending: doc.has_pending_writes,
        })
    }

    /// Convert a list of documents, skipping malformed ones
    pub fn from_documents(docs: &[Document]) -> Vec<Self> {
        docs.iter()
            .filter_map(|doc| {
                let item = Self::from_document(doc);
                if item.is_none() {
                    warn!("Skipping malformed item document {}", doc.id);
                }
                item
            })
            .collect()
    }

    /// Fields for flipping the completion flag
    pub fn toggle_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(FIELD_COMPLETED.to_string(), Value::Bool(!self.completed));
        fields
    }
}

/// A new item before it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub text: String,
    pub owner_id: String,
}

impl NewItem {
    pub fn new(text: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Document fields for `add`; new items start incomplete
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(FIELD_TEXT.to_string(), Value::String(self.text.clone()));
        fields.insert(FIELD_OWNER.to_string(), Value::String(self.owner_id.clone()));
        fields.insert(FIELD_COMPLETED.to_string(), Value::Bool(false));
        fields
    }
}

/// Kind of network link reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    None,
    #[default]
    Unknown,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Wifi => "wifi",
            ConnectionType::Cellular => "cellular",
            ConnectionType::None => "none",
            ConnectionType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest observed device connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
}

impl ConnectivityState {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            connection_type,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            connection_type: ConnectionType::None,
        }
    }
}

impl Default for ConnectivityState {
    /// Assume connected until the platform reports otherwise
    fn default() -> Self {
        Self::online(ConnectionType::Unknown)
    }
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// Stable user id; owns items through the `userId` field
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document {
            id: "doc-1".to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            created_at: Some(Utc::now()),
            updated_at: None,
            version: 0,
            has_pending_writes: true,
        }
    }

    #[test]
    fn test_item_from_document() {
        let item = Item::from_document(&doc(json!({
            "text": "Water the ferns",
            "userId": "u1",
            "completed": true
        })))
        .unwrap();

        assert_eq!(item.id, "doc-1");
        assert_eq!(item.text, "Water the ferns");
        assert_eq!(item.owner_id, "u1");
        assert!(item.completed);
        assert!(item.pending);
    }

    #[test]
    fn test_item_missing_completed_defaults_false() {
        let item = Item::from_document(&doc(json!({"text": "Repot", "userId": "u1"}))).unwrap();
        assert!(!item.completed);
    }

    #[test]
    fn test_malformed_documents_skipped() {
        let docs = vec![
            doc(json!({"text": "ok", "userId": "u1"})),
            doc(json!({"text": 42, "userId": "u1"})),
            doc(json!({"userId": "u1"})),
        ];
        assert_eq!(Item::from_documents(&docs).len(), 1);
    }

    #[test]
    fn test_new_item_fields() {
        let fields = NewItem::new("Buy soil", "u1").to_fields();
        assert_eq!(fields.get(FIELD_TEXT), Some(&json!("Buy soil")));
        assert_eq!(fields.get(FIELD_OWNER), Some(&json!("u1")));
        assert_eq!(fields.get(FIELD_COMPLETED), Some(&json!(false)));
    }

    #[test]
    fn test_toggle_fields_flip_completion() {
        let mut item = Item::from_document(&doc(json!({"text": "t", "userId": "u"}))).unwrap();
        assert_eq!(item.toggle_fields().get(FIELD_COMPLETED), Some(&json!(true)));
        item.completed = true;
        assert_eq!(item.toggle_fields().get(FIELD_COMPLETED), Some(&json!(false)));
    }

    #[test]
    fn test_connectivity_default_is_online_unknown() {
        let state = ConnectivityState::default();
        assert!(state.is_connected);
        assert_eq!(state.connection_type, ConnectionType::Unknown);
        assert_eq!(ConnectivityState::offline().connection_type.to_string(), "none");
    }
}
