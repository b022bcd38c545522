//! Remote document store backend
//!
//! [`RemoteBackend`] is the seam to the hosted document database: commit a
//! queued write, run a query, watch committed changes. Transport and
//! authentication of a real service live behind an implementation of it.
//!
//! [`MemoryBackend`] is a complete in-process implementation. Several
//! [`DocumentStore`](super::DocumentStore)s sharing one `MemoryBackend` behave
//! like devices sharing one account.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use super::document::{strip_server_fields, Document, Mutation, PendingWrite, Query, RemoteChange};
use crate::error::BackendError;

/// Capacity of the change feed; slower watchers resynchronize by query
const CHANGE_FEED_CAPACITY: usize = 256;

/// Result of a backend query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub documents: Vec<Document>,
    /// Version of the latest commit the result reflects
    pub read_version: u64,
}

/// Hosted document database as seen by the client
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply one write; the backend assigns timestamps and a version
    async fn commit(&self, write: &PendingWrite) -> Result<RemoteChange, BackendError>;

    /// Current result of `query`, newest first
    async fn query(&self, query: &Query) -> Result<QueryResult, BackendError>;

    /// Feed of every committed change
    fn changes(&self) -> broadcast::Receiver<RemoteChange>;
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Document>>,
    version: u64,
    last_timestamp: Option<DateTime<Utc>>,
    unavailable: bool,
    deny_reads: bool,
    commit_log: Vec<(String, &'static str)>,
}

impl MemoryState {
    /// Server clock, strictly increasing
    fn server_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }
}

/// In-process backend with server timestamps and a change feed
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<RemoteChange>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            changes,
        }
    }

    /// Simulate an outage; every call fails with `Unavailable` while down
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Make queries fail with `PermissionDenied`
    pub fn deny_reads(&self, deny: bool) {
        self.lock().deny_reads = deny;
    }

    /// All documents in `collection`, newest first
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let state = self.lock();
        let docs = state.collections.get(collection);
        Query::collection(collection).apply(docs.into_iter().flat_map(|c| c.values()))
    }

    /// Document ids and mutation kinds in commit order
    pub fn commit_log(&self) -> Vec<(String, &'static str)> {
        self.lock().commit_log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn commit(&self, write: &PendingWrite) -> Result<RemoteChange, BackendError> {
        let change = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(BackendError::Unavailable(
                    "the backend could not be reached".to_string(),
                ));
            }

            let now = state.server_timestamp();
            let version = state.version + 1;
            let collection = state
                .collections
                .entry(write.collection.clone())
                .or_default();

            let document = match &write.mutation {
                Mutation::Set(fields) => {
                    let doc = Document {
                        id: write.doc_id.clone(),
                        fields: strip_server_fields(fields.clone()),
                        created_at: Some(now),
                        updated_at: Some(now),
                        version,
                        has_pending_writes: false,
                    };
                    collection.insert(write.doc_id.clone(), doc.clone());
                    Some(doc)
                }
                Mutation::Update(fields) => {
                    let Some(doc) = collection.get_mut(&write.doc_id) else {
                        return Err(BackendError::NotFound {
                            collection: write.collection.clone(),
                            id: write.doc_id.clone(),
                        });
                    };
                    for (key, value) in strip_server_fields(fields.clone()) {
                        doc.fields.insert(key, value);
                    }
                    doc.updated_at = Some(now);
                    doc.version = version;
                    Some(doc.clone())
                }
                Mutation::Delete => {
                    collection.remove(&write.doc_id);
                    None
                }
            };

            state.version = version;
            state
                .commit_log
                .push((write.doc_id.clone(), write.mutation.kind()));

            RemoteChange {
                collection: write.collection.clone(),
                doc_id: write.doc_id.clone(),
                version,
                document,
            }
        };

        debug!(
            "Committed {} {}/{} at version {}",
            write.mutation.kind(),
            change.collection,
            change.doc_id,
            change.version
        );

        // No receivers is fine
        let _ = self.changes.send(change.clone());
        Ok(change)
    }

    async fn query(&self, query: &Query) -> Result<QueryResult, BackendError> {
        let state = self.lock();
        if state.unavailable {
            return Err(BackendError::Unavailable(
                "the backend could not be reached".to_string(),
            ));
        }
        if state.deny_reads {
            return Err(BackendError::PermissionDenied(format!(
                "cannot read collection '{}'",
                query.collection
            )));
        }

        let docs = state.collections.get(&query.collection);
        Ok(QueryResult {
            documents: query.apply(docs.into_iter().flat_map(|c| c.values())),
            read_version: state.version,
        })
    }

    fn changes(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}
