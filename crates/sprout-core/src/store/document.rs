//! Documents, queries and queued mutations

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BackendError, WriteError};
use crate::models::{FIELD_CREATED_AT, FIELD_OWNER, FIELD_UPDATED_AT};

/// Document field map
pub type Fields = Map<String, Value>;

/// A record in a remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier, unique within the collection
    pub id: String,
    /// User data
    pub fields: Fields,
    /// Server creation timestamp, or the local estimate while pending
    pub created_at: Option<DateTime<Utc>>,
    /// Server update timestamp, or the local estimate while pending
    pub updated_at: Option<DateTime<Utc>>,
    /// Backend commit version; 0 for documents never acknowledged
    pub version: u64,
    /// Local writes to this document are not yet acknowledged
    #[serde(default)]
    pub has_pending_writes: bool,
}

impl Document {
    /// Owner uid, if the document carries one
    pub fn owner(&self) -> Option<&str> {
        self.fields.get(FIELD_OWNER).and_then(Value::as_str)
    }

    /// Fields plus server timestamps, as a client reading the record sees it
    pub fn data(&self) -> Fields {
        let mut data = self.fields.clone();
        let stamp = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null)
        };
        data.insert(FIELD_CREATED_AT.to_string(), stamp(self.created_at));
        data.insert(FIELD_UPDATED_AT.to_string(), stamp(self.updated_at));
        data
    }
}

/// Owner-scoped live query: filter on `userId`, newest first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub owner: Option<String>,
}

impl Query {
    /// Every document in `collection`
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            owner: None,
        }
    }

    /// Documents in `collection` owned by `owner`
    pub fn owned_by(collection: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            owner: Some(owner.into()),
        }
    }

    /// Whether `doc` (in this query's collection) belongs to the result
    pub fn matches(&self, doc: &Document) -> bool {
        match &self.owner {
            Some(owner) => doc.owner() == Some(owner.as_str()),
            None => true,
        }
    }

    /// Filter and order documents the way the query defines
    pub fn apply<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut result: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();
        result.sort_by(newest_first);
        result
    }
}

/// Order by creation time descending, ties by id descending
fn newest_first(a: &Document, b: &Document) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// A change requested by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "lowercase")]
pub enum Mutation {
    /// Create (or replace) the document
    Set(Fields),
    /// Merge fields into an existing document
    Update(Fields),
    /// Remove the document
    Delete,
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Set(_) => "set",
            Mutation::Update(_) => "update",
            Mutation::Delete => "delete",
        }
    }
}

/// A mutation queued locally until the backend acknowledges it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Submission order
    pub seq: u64,
    pub collection: String,
    pub doc_id: String,
    pub mutation: Mutation,
    /// When the write was issued; used as the timestamp estimate
    pub local_time: DateTime<Utc>,
}

impl PendingWrite {
    /// Latency-compensated result of this write on top of `existing`
    pub fn apply_local(&self, existing: Option<Document>) -> Option<Document> {
        match &self.mutation {
            Mutation::Set(fields) => Some(Document {
                id: self.doc_id.clone(),
                fields: fields.clone(),
                created_at: Some(self.local_time),
                updated_at: Some(self.local_time),
                version: existing.map(|doc| doc.version).unwrap_or(0),
                has_pending_writes: true,
            }),
            Mutation::Update(fields) => existing.map(|mut doc| {
                for (key, value) in fields {
                    doc.fields.insert(key.clone(), value.clone());
                }
                doc.updated_at = Some(self.local_time);
                doc.has_pending_writes = true;
                doc
            }),
            Mutation::Delete => None,
        }
    }
}

/// A committed change as reported by the backend
///
/// Returned as the acknowledgement of a commit and broadcast to every
/// client watching the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub collection: String,
    pub doc_id: String,
    /// Commit version; later commits carry higher versions
    pub version: u64,
    /// Resulting document, `None` when deleted
    pub document: Option<Document>,
}

/// A queued write the backend refused permanently
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedWrite {
    pub write: PendingWrite,
    pub error: BackendError,
}

impl From<RejectedWrite> for WriteError {
    fn from(rejected: RejectedWrite) -> Self {
        WriteError::Rejected {
            collection: rejected.write.collection,
            id: rejected.write.doc_id,
            source: rejected.error,
        }
    }
}

/// Remove server-owned fields from client data
pub(crate) fn strip_server_fields(mut fields: Fields) -> Fields {
    fields.remove(FIELD_CREATED_AT);
    fields.remove(FIELD_UPDATED_AT);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn doc(id: &str, owner: &str, created: DateTime<Utc>) -> Document {
        Document {
            id: id.to_string(),
            fields: json!({"userId": owner, "text": id})
                .as_object()
                .cloned()
                .unwrap(),
            created_at: Some(created),
            updated_at: Some(created),
            version: 1,
            has_pending_writes: false,
        }
    }

    fn write(mutation: Mutation) -> PendingWrite {
        PendingWrite {
            seq: 1,
            collection: "items".to_string(),
            doc_id: "a".to_string(),
            mutation,
            local_time: Utc::now(),
        }
    }

    #[test]
    fn test_query_filters_by_owner_and_orders_newest_first() {
        let t0 = Utc::now();
        let docs = vec![
            doc("old", "alice", t0),
            doc("new", "alice", t0 + Duration::seconds(5)),
            doc("other", "bob", t0 + Duration::seconds(10)),
        ];

        let result = Query::owned_by("items", "alice").apply(&docs);
        let ids: Vec<&str> = result.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(Query::collection("items").apply(&docs).len(), 3);
    }

    #[test]
    fn test_ties_break_by_id() {
        let t0 = Utc::now();
        let docs = vec![doc("a", "u", t0), doc("b", "u", t0)];
        let result = Query::owned_by("items", "u").apply(&docs);
        assert_eq!(result[0].id, "b");
    }

    #[test]
    fn test_apply_local_set_marks_pending() {
        let fields = json!({"text": "Buy soil"}).as_object().cloned().unwrap();
        let w = write(Mutation::Set(fields));
        let result = w.apply_local(None).unwrap();
        assert!(result.has_pending_writes);
        assert_eq!(result.created_at, Some(w.local_time));
        assert_eq!(result.version, 0);
    }

    #[test]
    fn test_apply_local_update_merges() {
        let base = doc("a", "u", Utc::now());
        let fields = json!({"completed": true}).as_object().cloned().unwrap();
        let w = write(Mutation::Update(fields));

        let result = w.apply_local(Some(base.clone())).unwrap();
        assert_eq!(result.fields.get("completed"), Some(&json!(true)));
        assert_eq!(result.fields.get("text"), Some(&json!("a")));
        assert_eq!(result.created_at, base.created_at);
        assert_eq!(result.updated_at, Some(w.local_time));

        assert!(w.apply_local(None).is_none());
    }

    #[test]
    fn test_apply_local_delete() {
        let w = write(Mutation::Delete);
        assert!(w.apply_local(Some(doc("a", "u", Utc::now()))).is_none());
    }

    #[test]
    fn test_mutation_serialization() {
        let fields = json!({"text": "x"}).as_object().cloned().unwrap();
        let encoded = serde_json::to_string(&Mutation::Update(fields.clone())).unwrap();
        assert!(encoded.contains("\"kind\":\"update\""));
        let decoded: Mutation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, Mutation::Update(fields));
    }

    #[test]
    fn test_strip_server_fields() {
        let fields = json!({"text": "x", "createdAt": 1, "updatedAt": 2})
            .as_object()
            .cloned()
            .unwrap();
        let stripped = strip_server_fields(fields);
        assert_eq!(stripped.len(), 1);
    }

    #[test]
    fn test_data_includes_timestamps() {
        let mut d = doc("a", "u", Utc::now());
        d.updated_at = None;
        let data = d.data();
        assert!(data.get("createdAt").unwrap().is_string());
        assert!(data.get("updatedAt").unwrap().is_null());
    }
}
